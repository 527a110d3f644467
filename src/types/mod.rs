use serde::{Deserialize, Serialize};

mod user;

pub use user::{RedactedUser, UserContext, UserIdentity};

/// A flag value as delivered by the service.
///
/// Variant order matters for untagged deserialization: `null` must resolve to
/// [`FlagValue::Null`] before the catch-all JSON variant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Number(f64),
    String(String),
    #[default]
    Null,
    Json(serde_json::Value),
}

impl FlagValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FlagValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Integral numbers only; `1.5` is not an int.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FlagValue::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            FlagValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FlagValue::Null)
    }

    /// Lossless conversion to a plain JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FlagValue::Bool(b) => serde_json::Value::Bool(*b),
            FlagValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FlagValue::String(s) => serde_json::Value::String(s.clone()),
            FlagValue::Null => serde_json::Value::Null,
            FlagValue::Json(v) => v.clone(),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::String(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        FlagValue::Number(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Number(value as f64)
    }
}

impl From<i32> for FlagValue {
    fn from(value: i32) -> Self {
        FlagValue::Number(value as f64)
    }
}

impl From<serde_json::Value> for FlagValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => FlagValue::Bool(b),
            serde_json::Value::String(s) => FlagValue::String(s),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => FlagValue::Number(f),
                None => FlagValue::Json(serde_json::Value::Number(n)),
            },
            serde_json::Value::Null => FlagValue::Null,
            other => FlagValue::Json(other),
        }
    }
}

/// A single server-evaluated flag for the active user.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRecord {
    #[serde(default)]
    pub value: FlagValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_version: Option<u64>,
    #[serde(default)]
    pub track_events: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<serde_json::Value>,
    #[serde(default)]
    pub track_reason: bool,
}

impl FlagRecord {
    pub fn new(value: impl Into<FlagValue>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_variation(mut self, variation: i64) -> Self {
        self.variation = Some(variation);
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_flag_version(mut self, flag_version: u64) -> Self {
        self.flag_version = Some(flag_version);
        self
    }

    pub fn with_track_events(mut self, track_events: bool) -> Self {
        self.track_events = track_events;
        self
    }

    pub fn with_reason(mut self, reason: serde_json::Value, track_reason: bool) -> Self {
        self.reason = Some(reason);
        self.track_reason = track_reason;
        self
    }

    /// Two records are the same revision when value, variation and version agree.
    /// Event-tracking metadata is ignored.
    pub fn same_revision(&self, other: &FlagRecord) -> bool {
        self.value == other.value && self.variation == other.variation && self.version == other.version
    }

    /// Version reported in events: the flag's own version when known, else the payload version.
    pub fn version_for_events(&self) -> Option<u64> {
        self.flag_version.or(self.version)
    }
}
