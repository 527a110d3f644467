//! FlagKit flag synchronization core
//!
//! Keeps a client's feature flags current and reports how they are used:
//! a versioned flag store, a persistent per-user cache with legacy migration,
//! streaming and polling synchronization with throttled reconnects, change
//! observers, and batched analytics events.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use flagkit_sync::{ClientOptions, FlagSyncClient, UserContext};
//!
//! #[tokio::main]
//! async fn main() -> flagkit_sync::Result<()> {
//!     let options = ClientOptions::builder("mob_your_key")
//!         .cache_directory("/tmp/flagkit")
//!         .build();
//!     let client = FlagSyncClient::with_http(options, UserContext::new("user-123"))?;
//!     client.start();
//!
//!     let owner = Arc::new(());
//!     client.observe("dark-mode", &owner, |changes| {
//!         println!("dark-mode changed: {:?}", changes);
//!     });
//!
//!     let dark_mode = client.bool_variation("dark-mode", false);
//!     println!("dark-mode = {}", dark_mode);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod error;
pub mod http;
pub mod storage;
pub mod types;
mod client;

pub use types::{FlagRecord, FlagValue, RedactedUser, UserContext, UserIdentity};

pub use error::{ErrorCode, ErrorKind, Result, SyncError};

pub use core::{
    ClientOptions, ClientOptionsBuilder, ConnectionInformation, ConnectionMode, Event, EventBatch,
    EventReporter, FailureInfo, FlagChange, FlagChangeNotifier, FlagEventStream, FlagService, FlagStore,
    FlagSynchronizer, ObservedKeys, PersistentFlagCache, StreamMessage, StreamingMode, SyncState, Throttler,
};

pub use http::HttpFlagService;

pub use storage::{FileStore, InMemoryStore, KeyValueStore};

pub use client::{FlagSyncClient, RunMode, SDK_VERSION};
