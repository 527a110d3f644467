//! Persistent multi-user flag cache.
//!
//! Keeps the last known flags for up to `max_cached_users` user identities so
//! a client can serve the previous session's values before the first sync
//! completes. Recency is the time an entry was last stored; reading never
//! refreshes it. Legacy layouts are migrated the first time the cache is used.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::cache_migration::{latest_per_identity, LegacySchema, MigratedEntry};
use crate::core::flag_store::FlagStore;
use crate::error::{ErrorCode, Result, SyncError};
use crate::storage::KeyValueStore;
use crate::types::UserIdentity;

/// Storage key prefix for entries in the current layout.
pub const CACHE_KEY_PREFIX: &str = "flagkit.flags.v7.";

/// One user's cached flags in the current layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub identity: UserIdentity,
    pub flags: FlagStore,
    pub last_updated: DateTime<Utc>,
    /// Insertion order, breaks ties between equal timestamps.
    pub sequence: u64,
}

impl CacheEntry {
    fn recency(&self) -> (DateTime<Utc>, u64) {
        (self.last_updated, self.sequence)
    }
}

struct CacheState {
    prepared: bool,
}

pub struct PersistentFlagCache {
    storage: Arc<dyn KeyValueStore>,
    max_cached_users: usize,
    environment_key: String,
    next_sequence: AtomicU64,
    state: parking_lot::Mutex<CacheState>,
}

impl PersistentFlagCache {
    /// `environment_key` selects the environment when migrating environment-scoped legacy data.
    pub fn new(storage: Arc<dyn KeyValueStore>, max_cached_users: usize, environment_key: impl Into<String>) -> Self {
        Self {
            storage,
            max_cached_users,
            environment_key: environment_key.into(),
            next_sequence: AtomicU64::new(0),
            state: parking_lot::Mutex::new(CacheState { prepared: false }),
        }
    }

    pub fn max_cached_users(&self) -> usize {
        self.max_cached_users
    }

    /// Upserts the flags for `identity`, then evicts the oldest entries beyond capacity.
    pub fn store(&self, identity: &UserIdentity, flags: &FlagStore) -> Result<()> {
        let _state = self.prepare()?;
        self.write_entry(identity, flags, Utc::now())?;
        self.evict_beyond(self.max_cached_users)?;
        Ok(())
    }

    /// Returns the cached flags for `identity` without touching its recency.
    pub fn retrieve(&self, identity: &UserIdentity) -> Result<Option<FlagStore>> {
        let _state = self.prepare()?;
        Ok(self.read_entry(&Self::storage_key(identity))?.map(|entry| entry.flags))
    }

    /// Evicts least-recently-stored entries until at most `if_count_exceeds` remain.
    ///
    /// Returns the number of entries removed.
    pub fn remove_oldest(&self, if_count_exceeds: usize) -> Result<usize> {
        let _state = self.prepare()?;
        self.evict_beyond(if_count_exceeds)
    }

    /// All current entries, least recently stored first.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let _state = self.prepare()?;
        self.load_entries()
    }

    pub fn clear(&self) -> Result<()> {
        let _state = self.prepare()?;
        for key in self.current_keys()? {
            self.storage.remove(&key)?;
        }
        Ok(())
    }

    fn storage_key(identity: &UserIdentity) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, identity.storage_key())
    }

    /// Runs legacy migration and seeds the sequence counter on first use.
    /// The returned guard serializes cache operations within this instance.
    fn prepare(&self) -> Result<parking_lot::MutexGuard<'_, CacheState>> {
        let mut state = self.state.lock();
        if !state.prepared {
            let highest = self
                .load_entries()?
                .iter()
                .map(|entry| entry.sequence + 1)
                .max()
                .unwrap_or(0);
            self.next_sequence.store(highest, Ordering::SeqCst);
            self.migrate_legacy()?;
            state.prepared = true;
        }
        Ok(state)
    }

    fn migrate_legacy(&self) -> Result<()> {
        let mut decoded: Vec<MigratedEntry> = Vec::new();
        let mut migrated_slots: Vec<LegacySchema> = Vec::new();

        for schema in LegacySchema::ALL {
            let raw = match self.storage.get(schema.storage_key()) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Skipping {} cache slot: {}", schema, e);
                    self.storage.remove(schema.storage_key())?;
                    continue;
                }
            };

            match schema.decode(&raw, &self.environment_key) {
                Ok(entries) => {
                    tracing::debug!("Decoded {} users from {} cache slot", entries.len(), schema);
                    decoded.extend(entries);
                    migrated_slots.push(schema);
                }
                Err(e) => {
                    tracing::warn!("Skipping {} cache slot: {}", schema, e);
                    self.storage.remove(schema.storage_key())?;
                }
            }
        }

        if migrated_slots.is_empty() {
            return Ok(());
        }

        for entry in latest_per_identity(decoded) {
            let key = Self::storage_key(&entry.identity);
            if let Some(existing) = self.read_entry(&key)? {
                if existing.last_updated >= entry.last_updated {
                    continue;
                }
            }
            self.write_entry(&entry.identity, &entry.flags, entry.last_updated)?;
        }

        for schema in migrated_slots {
            self.storage.remove(schema.storage_key())?;
        }

        let evicted = self.evict_beyond(self.max_cached_users)?;
        tracing::info!("Migrated legacy flag cache ({} entries evicted)", evicted);
        Ok(())
    }

    fn write_entry(&self, identity: &UserIdentity, flags: &FlagStore, last_updated: DateTime<Utc>) -> Result<()> {
        let entry = CacheEntry {
            identity: identity.clone(),
            flags: flags.clone(),
            last_updated,
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
        };
        let value = serde_json::to_value(&entry).map_err(|e| {
            SyncError::with_source(ErrorCode::CacheWriteError, "Failed to serialize cache entry", e)
        })?;
        self.storage.set(&Self::storage_key(identity), &value)
    }

    /// Unreadable entries are dropped and reported as absent.
    fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        let raw = match self.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) if e.code == ErrorCode::CacheInvalidData => {
                tracing::warn!("Dropping unreadable cache entry {}: {}", key, e);
                self.storage.remove(key)?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match serde_json::from_value::<CacheEntry>(raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!("Dropping unreadable cache entry {}: {}", key, e);
                self.storage.remove(key)?;
                Ok(None)
            }
        }
    }

    fn current_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .storage
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(CACHE_KEY_PREFIX))
            .collect())
    }

    fn load_entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for key in self.current_keys()? {
            if let Some(entry) = self.read_entry(&key)? {
                entries.push(entry);
            }
        }
        entries.sort_by_key(CacheEntry::recency);
        Ok(entries)
    }

    fn evict_beyond(&self, limit: usize) -> Result<usize> {
        let entries = self.load_entries()?;
        if entries.len() <= limit {
            return Ok(0);
        }
        let excess = entries.len() - limit;
        for entry in entries.iter().take(excess) {
            tracing::debug!("Evicting cached flags for {}", entry.identity);
            self.storage.remove(&Self::storage_key(&entry.identity))?;
        }
        Ok(excess)
    }
}
