//! Decoders for historical flag cache layouts.
//!
//! Each legacy layout lives under its own storage key. Decoding turns a slot
//! into a list of [`MigratedEntry`] values in the current shape; writing them
//! and deleting the slot is the cache's job.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::core::flag_store::FlagStore;
use crate::error::{ErrorCode, Result, SyncError};
use crate::types::{FlagRecord, FlagValue, UserIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LegacySchema {
    V2,
    V3,
    V4,
    V5,
    V6,
}

impl LegacySchema {
    /// Oldest first; migration runs in this order.
    pub const ALL: [LegacySchema; 5] = [
        LegacySchema::V2,
        LegacySchema::V3,
        LegacySchema::V4,
        LegacySchema::V5,
        LegacySchema::V6,
    ];

    pub fn storage_key(&self) -> &'static str {
        match self {
            LegacySchema::V2 => "flagkit.cache.v2",
            LegacySchema::V3 => "flagkit.cache.v3",
            LegacySchema::V4 => "flagkit.cache.v4",
            LegacySchema::V5 => "flagkit.cache.v5",
            LegacySchema::V6 => "flagkit.cache.v6",
        }
    }

    /// Decodes a raw slot. Environment-scoped layouts (V5, V6) only yield the
    /// environment identified by `api_key`.
    pub fn decode(&self, raw: &serde_json::Value, api_key: &str) -> Result<Vec<MigratedEntry>> {
        match self {
            LegacySchema::V2 => decode_slot::<V2User>(*self, raw).map(|users| {
                users
                    .into_values()
                    .map(|user| MigratedEntry {
                        identity: UserIdentity::new(user.key, None),
                        flags: user
                            .config
                            .into_iter()
                            .map(|(key, value)| (key, FlagRecord::new(value)))
                            .collect(),
                        last_updated: user.updated_at,
                    })
                    .collect()
            }),
            LegacySchema::V3 => decode_slot::<V3User>(*self, raw).map(|users| {
                users
                    .into_values()
                    .map(|user| MigratedEntry {
                        identity: UserIdentity::new(user.key, None),
                        flags: user
                            .config
                            .into_iter()
                            .map(|(key, flag)| (key, flag.into_record()))
                            .collect(),
                        last_updated: user.updated_at,
                    })
                    .collect()
            }),
            LegacySchema::V4 => decode_slot::<V4User>(*self, raw).map(|users| {
                users
                    .into_values()
                    .map(|user| MigratedEntry {
                        identity: UserIdentity::new(user.key, user.secondary),
                        flags: user
                            .config
                            .into_iter()
                            .map(|(key, flag)| (key, flag.into_record()))
                            .collect(),
                        last_updated: user.updated_at,
                    })
                    .collect()
            }),
            LegacySchema::V5 => decode_slot::<V5User>(*self, raw).map(|users| {
                users
                    .into_values()
                    .filter_map(|mut user| {
                        let env = user.environment_flags.remove(api_key)?;
                        Some(MigratedEntry {
                            identity: UserIdentity::new(user.user_key, user.secondary),
                            flags: env
                                .flags
                                .into_iter()
                                .map(|(key, flag)| (key, flag.into_record()))
                                .collect(),
                            last_updated: env.last_updated,
                        })
                    })
                    .collect()
            }),
            LegacySchema::V6 => decode_slot::<V6User>(*self, raw).map(|users| {
                users
                    .into_values()
                    .filter_map(|mut user| {
                        let env = user.environment_flags.remove(api_key)?;
                        Some(MigratedEntry {
                            identity: UserIdentity::new(user.user_key, user.secondary),
                            flags: FlagStore::new(env.flags),
                            last_updated: env.last_updated,
                        })
                    })
                    .collect()
            }),
        }
    }
}

impl std::fmt::Display for LegacySchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One user's flags converted from a legacy slot.
#[derive(Debug, Clone, PartialEq)]
pub struct MigratedEntry {
    pub identity: UserIdentity,
    pub flags: FlagStore,
    pub last_updated: DateTime<Utc>,
}

/// Merges decoded entries so each identity keeps its most recently updated flags.
pub fn latest_per_identity(entries: Vec<MigratedEntry>) -> Vec<MigratedEntry> {
    let mut latest: HashMap<UserIdentity, MigratedEntry> = HashMap::new();
    for entry in entries {
        match latest.get(&entry.identity) {
            Some(existing) if existing.last_updated > entry.last_updated => {}
            _ => {
                latest.insert(entry.identity.clone(), entry);
            }
        }
    }
    let mut merged: Vec<MigratedEntry> = latest.into_values().collect();
    merged.sort_by(|a, b| a.last_updated.cmp(&b.last_updated).then_with(|| a.identity.cmp(&b.identity)));
    merged
}

fn decode_slot<T: DeserializeOwned>(schema: LegacySchema, raw: &serde_json::Value) -> Result<HashMap<String, T>> {
    HashMap::<String, T>::deserialize(raw).map_err(|e| {
        SyncError::with_source(
            ErrorCode::CacheMigrationFailed,
            format!("Unreadable {} cache slot", schema),
            e,
        )
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V2User {
    key: String,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    config: HashMap<String, FlagValue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V3Flag {
    #[serde(default)]
    value: FlagValue,
    #[serde(default)]
    version: Option<u64>,
}

impl V3Flag {
    fn into_record(self) -> FlagRecord {
        FlagRecord {
            value: self.value,
            version: self.version,
            ..FlagRecord::default()
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V3User {
    key: String,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    config: HashMap<String, V3Flag>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariationFlag {
    #[serde(default)]
    value: FlagValue,
    #[serde(default)]
    version: Option<u64>,
    #[serde(default)]
    variation: Option<i64>,
}

impl VariationFlag {
    fn into_record(self) -> FlagRecord {
        FlagRecord {
            value: self.value,
            version: self.version,
            variation: self.variation,
            ..FlagRecord::default()
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V4User {
    key: String,
    #[serde(default)]
    secondary: Option<String>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    config: HashMap<String, VariationFlag>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V5Environment {
    #[serde(default)]
    flags: HashMap<String, VariationFlag>,
    last_updated: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V5User {
    user_key: String,
    #[serde(default)]
    secondary: Option<String>,
    #[serde(default)]
    environment_flags: HashMap<String, V5Environment>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V6Environment {
    #[serde(default)]
    flags: HashMap<String, FlagRecord>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    last_updated: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct V6User {
    user_key: String,
    #[serde(default)]
    secondary: Option<String>,
    #[serde(default)]
    environment_flags: HashMap<String, V6Environment>,
}
