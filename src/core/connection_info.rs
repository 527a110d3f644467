use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{ErrorCode, ErrorKind, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionMode {
    Streaming,
    Polling,
    #[default]
    Offline,
    StreamingFailed,
    EstablishingStreaming,
}

/// Why the last synchronization attempt failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureInfo {
    #[serde(serialize_with = "serialize_code")]
    pub code: ErrorCode,
    #[serde(skip)]
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

fn serialize_code<S: serde::Serializer>(code: &ErrorCode, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(code.as_str())
}

impl FailureInfo {
    pub fn from_error(error: &SyncError) -> Self {
        Self {
            code: error.code,
            kind: error.kind(),
            message: error.message.clone(),
            at: Utc::now(),
        }
    }
}

/// Point-in-time view of the synchronizer's connectivity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInformation {
    pub mode: ConnectionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureInfo>,
}

/// Holder for [`ConnectionInformation`]. Reads are side-effect free; writes are crate-private.
#[derive(Debug, Default)]
pub struct ConnectionInfoCell {
    info: RwLock<ConnectionInformation>,
}

impl ConnectionInfoCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConnectionInformation {
        self.info.read().clone()
    }

    pub fn mode(&self) -> ConnectionMode {
        self.info.read().mode
    }

    pub(crate) fn set_mode(&self, mode: ConnectionMode) {
        let mut info = self.info.write();
        if info.mode != mode {
            tracing::debug!("Connection mode {:?} -> {:?}", info.mode, mode);
            info.mode = mode;
        }
    }

    pub(crate) fn record_success(&self, mode: ConnectionMode) {
        let mut info = self.info.write();
        info.mode = mode;
        info.last_success_at = Some(Utc::now());
    }

    pub(crate) fn record_failure(&self, error: &SyncError, mode: ConnectionMode) {
        let mut info = self.info.write();
        info.mode = mode;
        info.last_failure = Some(FailureInfo::from_error(error));
    }
}
