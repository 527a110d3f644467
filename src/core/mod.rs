mod backend;
mod cache_migration;
mod change_notifier;
mod config;
mod connection_info;
mod event_reporter;
mod events;
mod flag_cache;
mod flag_counter;
mod flag_store;
mod flag_synchronizer;
mod throttler;

pub use backend::{FlagEventStream, FlagService, StreamMessage};
pub use cache_migration::{latest_per_identity, LegacySchema, MigratedEntry};
pub use change_notifier::{
    ChangeHandler, FlagChange, FlagChangeNotifier, FlagChangeObserver, ObservedKeys, ObserverOwner,
    UnchangedHandler,
};
pub use config::{
    ClientOptions, ClientOptionsBuilder, StreamingMode, DEFAULT_BACKOFF_BASE_DELAY, DEFAULT_BACKOFF_MAX_DELAY,
    DEFAULT_BASE_URL, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_EVENTS_URL, DEFAULT_EVENT_FLUSH_INTERVAL,
    DEFAULT_EVENT_PUBLISH_ATTEMPTS, DEFAULT_MAX_CACHED_USERS, DEFAULT_MAX_EVENT_QUEUE_SIZE,
    DEFAULT_POLLING_INTERVAL_BACKGROUND, DEFAULT_POLLING_INTERVAL_FOREGROUND, DEFAULT_STREAM_READ_TIMEOUT,
    DEFAULT_STREAM_URL,
};
pub use connection_info::{ConnectionInfoCell, ConnectionInformation, ConnectionMode, FailureInfo};
pub use event_reporter::{EventReporter, EventReporterConfig, ReporterDiagnostics};
pub use events::{CustomEvent, Event, EventBatch, FeatureEvent, IdentifyEvent, SummaryEvent};
pub use flag_cache::{CacheEntry, PersistentFlagCache, CACHE_KEY_PREFIX};
pub use flag_counter::{FlagCounter, FlagRequestTracker, FlagValueCounter};
pub use flag_store::{FlagStore, FlagStoreCell};
pub use flag_synchronizer::{FlagSynchronizer, SyncState, SyncTargets, SynchronizerConfig};
pub use throttler::{Throttler, MIN_JITTER_FACTOR};
