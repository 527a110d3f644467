use std::collections::{BTreeMap, BTreeSet};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Separator between key and secondary inside a storage key. Not valid in either part.
const IDENTITY_SEPARATOR: char = '\u{1f}';

/// The end-user the flags are evaluated for.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub anonymous: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Attribute names never sent in events for this user.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub private_attributes: BTreeSet<String>,
}

impl UserContext {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn secondary(mut self, secondary: impl Into<String>) -> Self {
        self.secondary = Some(secondary.into());
        self
    }

    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn private_attribute(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let name = name.into();
        self.private_attributes.insert(name.clone());
        self.attributes.insert(name, value.into());
        self
    }

    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            key: self.key.clone(),
            secondary: self.secondary.clone(),
        }
    }

    /// Copy suitable for analytics events: private attributes are removed and listed by name.
    ///
    /// An attribute is private when `all_private` is set, when it is named in
    /// `global_private`, or when the user marked it private.
    pub fn redacted(&self, all_private: bool, global_private: &[String]) -> RedactedUser {
        let mut custom = BTreeMap::new();
        let mut private_attrs = BTreeSet::new();

        for (name, value) in &self.attributes {
            let is_private = all_private
                || self.private_attributes.contains(name)
                || global_private.iter().any(|g| g == name);
            if is_private {
                private_attrs.insert(name.clone());
            } else {
                custom.insert(name.clone(), value.clone());
            }
        }

        RedactedUser {
            key: self.key.clone(),
            secondary: self.secondary.clone(),
            anonymous: self.anonymous,
            custom,
            private_attrs,
        }
    }
}

/// User representation embedded in published events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedUser {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub anonymous: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub private_attrs: BTreeSet<String>,
}

/// Persistence key for a user: the user key plus the context-selecting secondary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserIdentity {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

impl UserIdentity {
    pub fn new(key: impl Into<String>, secondary: Option<String>) -> Self {
        Self {
            key: key.into(),
            secondary,
        }
    }

    /// Filesystem- and URL-safe encoding, unique per (key, secondary).
    pub fn storage_key(&self) -> String {
        let raw = match &self.secondary {
            Some(secondary) => format!("{}{}{}", self.key, IDENTITY_SEPARATOR, secondary),
            None => self.key.clone(),
        };
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }
}

impl std::fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.secondary {
            Some(secondary) => write!(f, "{} ({})", self.key, secondary),
            None => write!(f, "{}", self.key),
        }
    }
}
