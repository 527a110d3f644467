//! Analytics event payloads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core::flag_counter::FlagCounter;
use crate::types::{FlagRecord, FlagValue, RedactedUser};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
    Feature(FeatureEvent),
    Custom(CustomEvent),
    Identify(IdentifyEvent),
    Summary(SummaryEvent),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Feature(_) => "feature",
            Event::Custom(_) => "custom",
            Event::Identify(_) => "identify",
            Event::Summary(_) => "summary",
        }
    }
}

/// A single tracked flag evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEvent {
    pub key: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub creation_date: DateTime<Utc>,
    pub user: RedactedUser,
    pub value: FlagValue,
    pub default: FlagValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<serde_json::Value>,
}

impl FeatureEvent {
    pub fn new(key: &str, value: FlagValue, default: FlagValue, flag: &FlagRecord, user: RedactedUser) -> Self {
        Self {
            key: key.to_string(),
            creation_date: Utc::now(),
            user,
            value,
            default,
            variation: flag.variation,
            version: flag.version_for_events(),
            reason: if flag.track_reason { flag.reason.clone() } else { None },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEvent {
    pub key: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub creation_date: DateTime<Utc>,
    pub user: RedactedUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyEvent {
    pub key: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub creation_date: DateTime<Utc>,
    pub user: RedactedUser,
}

/// Aggregated evaluation counts for one flush window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryEvent {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end_date: DateTime<Utc>,
    pub features: BTreeMap<String, FlagCounter>,
}

/// Events published together in one request. Serializes as a plain array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EventBatch {
    #[serde(skip)]
    pub payload_id: Uuid,
    pub events: Vec<Event>,
}

impl EventBatch {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            payload_id: Uuid::new_v4(),
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn summary(&self) -> Option<&SummaryEvent> {
        self.events.iter().find_map(|event| match event {
            Event::Summary(summary) => Some(summary),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserContext;
    use serde_json::json;

    #[test]
    fn test_feature_event_serialization() {
        let flag = FlagRecord::new(true)
            .with_variation(1)
            .with_flag_version(7)
            .with_reason(json!({"kind": "FALLTHROUGH"}), true);
        let user = UserContext::new("u1").redacted(false, &[]);
        let event = Event::Feature(FeatureEvent::new(
            "flag-a",
            FlagValue::Bool(true),
            FlagValue::Bool(false),
            &flag,
            user,
        ));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "feature");
        assert_eq!(json["key"], "flag-a");
        assert_eq!(json["variation"], 1);
        assert_eq!(json["version"], 7);
        assert_eq!(json["reason"], json!({"kind": "FALLTHROUGH"}));
        assert_eq!(json["user"], json!({"key": "u1"}));
        assert!(json["creationDate"].is_i64());
    }

    #[test]
    fn test_reason_omitted_unless_tracked() {
        let flag = FlagRecord::new(true).with_reason(json!({"kind": "OFF"}), false);
        let event = FeatureEvent::new(
            "a",
            FlagValue::Bool(true),
            FlagValue::Bool(true),
            &flag,
            UserContext::new("u").redacted(false, &[]),
        );
        assert!(event.reason.is_none());
    }

    #[test]
    fn test_batch_serializes_as_array() {
        let batch = EventBatch::new(vec![Event::Identify(IdentifyEvent {
            key: "u1".into(),
            creation_date: Utc::now(),
            user: UserContext::new("u1").redacted(false, &[]),
        })]);
        let json = serde_json::to_value(&batch).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["kind"], "identify");
    }
}
