//! Immutable flag snapshots for the active user.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{FlagRecord, FlagValue};

/// A complete set of flags for one user. Cloning is cheap; contents never change in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagStore {
    flags: Arc<HashMap<String, FlagRecord>>,
}

impl FlagStore {
    pub fn new(flags: HashMap<String, FlagRecord>) -> Self {
        Self {
            flags: Arc::new(flags),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FlagRecord> {
        self.flags.get(key)
    }

    pub fn value(&self, key: &str) -> Option<&FlagValue> {
        self.flags.get(key).map(|record| &record.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.flags.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.flags.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FlagRecord)> {
        self.flags.iter()
    }

    pub fn values(&self) -> HashMap<String, FlagValue> {
        self.flags
            .iter()
            .map(|(key, record)| (key.clone(), record.value.clone()))
            .collect()
    }

    /// Keys present in only one snapshot, or whose records differ in value, variation or version.
    pub fn changed_keys(&self, other: &FlagStore) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for (key, record) in self.flags.iter() {
            match other.get(key) {
                Some(other_record) if record.same_revision(other_record) => {}
                _ => {
                    changed.insert(key.clone());
                }
            }
        }
        for key in other.keys() {
            if !self.contains(key) {
                changed.insert(key.clone());
            }
        }
        changed
    }

    /// New snapshot with `record` stored under `key`, unless the stored record is at least as new.
    ///
    /// Returns `None` when the patch is stale.
    pub fn with_patch(&self, key: &str, record: FlagRecord) -> Option<FlagStore> {
        if let Some(existing) = self.get(key) {
            if is_stale(existing.version, record.version) {
                return None;
            }
        }
        let mut flags = (*self.flags).clone();
        flags.insert(key.to_string(), record);
        Some(FlagStore::new(flags))
    }

    /// New snapshot without `key`. `None` when the key is absent or the delete is stale.
    pub fn with_delete(&self, key: &str, version: Option<u64>) -> Option<FlagStore> {
        let existing = self.get(key)?;
        if is_stale(existing.version, version) {
            return None;
        }
        let mut flags = (*self.flags).clone();
        flags.remove(key);
        Some(FlagStore::new(flags))
    }
}

fn is_stale(current: Option<u64>, incoming: Option<u64>) -> bool {
    matches!((current, incoming), (Some(current), Some(incoming)) if incoming <= current)
}

impl From<HashMap<String, FlagRecord>> for FlagStore {
    fn from(flags: HashMap<String, FlagRecord>) -> Self {
        Self::new(flags)
    }
}

impl FromIterator<(String, FlagRecord)> for FlagStore {
    fn from_iter<I: IntoIterator<Item = (String, FlagRecord)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Serialize for FlagStore {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.flags.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FlagStore {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        HashMap::<String, FlagRecord>::deserialize(deserializer).map(FlagStore::new)
    }
}

/// Shared holder of the current snapshot. Readers clone the `Arc`; only the
/// synchronizer swaps it.
#[derive(Debug, Default)]
pub struct FlagStoreCell {
    current: RwLock<FlagStore>,
}

impl FlagStoreCell {
    pub fn new(initial: FlagStore) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub fn snapshot(&self) -> FlagStore {
        self.current.read().clone()
    }

    /// Swaps in `next` and returns the previous snapshot.
    pub(crate) fn replace(&self, next: FlagStore) -> FlagStore {
        std::mem::replace(&mut *self.current.write(), next)
    }
}
