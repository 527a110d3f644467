//! Evaluation counters for summary events.
//!
//! Every flag read is tallied here between flushes. The tally is keyed by the
//! value served and, for flags known to the store, by variation and flag
//! version, so the service can reconstruct how often each variation was seen.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::types::{FlagRecord, FlagValue};

/// Tally for one (value, variation, version) combination, or for an unknown flag's value.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagValueCounter {
    pub reported_value: FlagValue,
    pub feature_flag: Option<FlagRecord>,
    pub is_known: bool,
    pub count: u64,
}

impl FlagValueCounter {
    fn matches(&self, reported_value: &FlagValue, flag: Option<&FlagRecord>) -> bool {
        if &self.reported_value != reported_value {
            return false;
        }
        match (flag, &self.feature_flag) {
            (Some(flag), Some(counted)) if self.is_known => {
                flag.variation == counted.variation
                    && flag.version_for_events() == counted.version_for_events()
            }
            (None, _) => !self.is_known,
            _ => false,
        }
    }
}

impl Serialize for FlagValueCounter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let flag = self.feature_flag.as_ref();
        let variation = flag.and_then(|f| f.variation);
        let version = flag.and_then(FlagRecord::version_for_events);

        let mut state = serializer.serialize_struct("FlagValueCounter", 5)?;
        state.serialize_field("value", &self.reported_value)?;
        if let Some(variation) = variation {
            state.serialize_field("variation", &variation)?;
        } else {
            state.skip_field("variation")?;
        }
        if let Some(version) = version {
            state.serialize_field("version", &version)?;
        } else {
            state.skip_field("version")?;
        }
        if self.is_known {
            state.skip_field("unknown")?;
        } else {
            state.serialize_field("unknown", &true)?;
        }
        state.serialize_field("count", &self.count)?;
        state.end()
    }
}

/// All tallies for a single flag key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlagCounter {
    #[serde(rename = "default")]
    pub default_value: Option<FlagValue>,
    #[serde(rename = "counters")]
    pub value_counters: Vec<FlagValueCounter>,
}

impl FlagCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one evaluation. `flag` is `None` when the key was not in the store.
    ///
    /// The default value is captured on the first call and never overwritten.
    pub fn log_request(&mut self, reported_value: FlagValue, flag: Option<&FlagRecord>, default_value: FlagValue) {
        if self.default_value.is_none() {
            self.default_value = Some(default_value);
        }

        if let Some(counter) = self
            .value_counters
            .iter_mut()
            .find(|c| c.matches(&reported_value, flag))
        {
            counter.count += 1;
            if let Some(flag) = flag {
                counter.feature_flag = Some(flag.clone());
            }
            return;
        }

        self.value_counters.push(FlagValueCounter {
            reported_value,
            feature_flag: flag.cloned(),
            is_known: flag.is_some(),
            count: 1,
        });
    }

    /// Finds the counter matching a known flag, or the unknown-flag counter when `flag` is `None`.
    pub fn value_counter(&self, reported_value: &FlagValue, flag: Option<&FlagRecord>) -> Option<&FlagValueCounter> {
        self.value_counters
            .iter()
            .find(|c| c.matches(reported_value, flag))
    }

    pub fn total_count(&self) -> u64 {
        self.value_counters.iter().map(|c| c.count).sum()
    }
}

/// Per-key counters for the current flush window.
#[derive(Debug, Clone)]
pub struct FlagRequestTracker {
    pub start_date: DateTime<Utc>,
    pub flag_counters: HashMap<String, FlagCounter>,
}

impl Default for FlagRequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagRequestTracker {
    pub fn new() -> Self {
        Self {
            start_date: Utc::now(),
            flag_counters: HashMap::new(),
        }
    }

    pub fn track_request(
        &mut self,
        key: &str,
        reported_value: FlagValue,
        flag: Option<&FlagRecord>,
        default_value: FlagValue,
    ) {
        self.flag_counters
            .entry(key.to_string())
            .or_default()
            .log_request(reported_value, flag, default_value);
    }

    pub fn has_data(&self) -> bool {
        !self.flag_counters.is_empty()
    }

    pub fn counter(&self, key: &str) -> Option<&FlagCounter> {
        self.flag_counters.get(key)
    }
}
