//! The remote flag service as seen by the synchronizer and reporter.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::core::events::EventBatch;
use crate::core::flag_store::FlagStore;
use crate::error::Result;
use crate::types::{FlagRecord, UserContext};

/// One message on the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Complete flag set, replaces everything.
    Put(FlagStore),
    /// Upsert of a single flag.
    Patch { key: String, record: FlagRecord },
    Delete { key: String, version: Option<u64> },
    /// Flags changed; fetch them.
    Ping,
}

pub type FlagEventStream = Pin<Box<dyn Stream<Item = Result<StreamMessage>> + Send>>;

#[async_trait]
pub trait FlagService: Send + Sync {
    async fn fetch_flags(&self, user: &UserContext) -> Result<FlagStore>;

    /// Opens the push channel. The stream ending is treated as a disconnect.
    async fn open_event_stream(&self, user: &UserContext) -> Result<FlagEventStream>;

    async fn publish_events(&self, batch: &EventBatch) -> Result<()>;
}
