//! The client facade.
//!
//! [`FlagSyncClient`] owns one synchronizer and one event reporter for the
//! current user. Connectivity is the combination of the caller's online
//! intent, the run mode and whether [`FlagSyncClient::start`] has been called;
//! nothing goes online before `start`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::{
    ChangeHandler, ClientOptions, ConnectionInformation, EventReporter, EventReporterConfig, FlagChange,
    FlagChangeObserver, FlagService, FlagStore, FlagSynchronizer, ObservedKeys, PersistentFlagCache,
    ReporterDiagnostics, StreamingMode, SyncTargets, SynchronizerConfig,
};
use crate::error::Result;
use crate::http::HttpFlagService;
use crate::storage::{FileStore, InMemoryStore, KeyValueStore};
use crate::types::{FlagValue, UserContext};

pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Whether the host application is in the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunMode {
    #[default]
    Foreground,
    Background,
}

struct Connectivity {
    started: bool,
    online_intent: bool,
    run_mode: RunMode,
}

/// Client facade over the flag cache, synchronizer, change notifier and event reporter.
pub struct FlagSyncClient {
    options: ClientOptions,
    user: RwLock<UserContext>,
    targets: SyncTargets,
    synchronizer: FlagSynchronizer,
    reporter: EventReporter,
    connectivity: Mutex<Connectivity>,
}

impl FlagSyncClient {
    pub fn new(
        options: ClientOptions,
        user: UserContext,
        service: Arc<dyn FlagService>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        options.validate()?;

        let cache = Arc::new(PersistentFlagCache::new(
            storage,
            options.max_cached_users,
            options.api_key.clone(),
        ));
        let targets = SyncTargets::new(Some(cache));
        let synchronizer = FlagSynchronizer::new(
            Arc::clone(&service),
            targets.clone(),
            SynchronizerConfig::from_options(&options),
            user.clone(),
        );
        let reporter = EventReporter::new(EventReporterConfig::from(&options), service);

        Ok(Self {
            options,
            user: RwLock::new(user),
            targets,
            synchronizer,
            reporter,
            connectivity: Mutex::new(Connectivity {
                started: false,
                online_intent: false,
                run_mode: RunMode::Foreground,
            }),
        })
    }

    /// Client backed by the HTTP service. Flags persist to `cache_directory` when set.
    pub fn with_http(options: ClientOptions, user: UserContext) -> Result<Self> {
        options.validate()?;
        let service: Arc<dyn FlagService> = Arc::new(HttpFlagService::new(&options)?);
        let storage: Arc<dyn KeyValueStore> = match &options.cache_directory {
            Some(dir) => Arc::new(FileStore::open(dir)?),
            None => Arc::new(InMemoryStore::new()),
        };
        Self::new(options, user, service, storage)
    }

    /// Serves the user's cached flags, records an identify event and goes online
    /// if configured to.
    pub fn start(&self) {
        let user = self.user();
        tracing::info!("Starting flag client v{} for {}", SDK_VERSION, user.key);
        self.synchronizer.set_user(user.clone());
        self.reporter.record_identify(&user);
        {
            let mut connectivity = self.connectivity.lock();
            connectivity.started = true;
            connectivity.online_intent = self.options.start_online;
        }
        self.apply_connectivity();
    }

    /// Has no effect before [`start`](Self::start) or after [`close`](Self::close).
    pub fn set_online(&self, online: bool) {
        {
            let mut connectivity = self.connectivity.lock();
            if !connectivity.started {
                tracing::debug!("Ignoring set_online({}) on a client that is not started", online);
                return;
            }
            connectivity.online_intent = online;
        }
        self.apply_connectivity();
    }

    /// True when synchronization is running.
    pub fn is_online(&self) -> bool {
        self.synchronizer.is_online()
    }

    pub fn run_mode(&self) -> RunMode {
        self.connectivity.lock().run_mode
    }

    /// Background forces polling at the background interval, and stays offline
    /// unless background updates are enabled.
    pub fn set_run_mode(&self, run_mode: RunMode) {
        {
            let mut connectivity = self.connectivity.lock();
            if connectivity.run_mode == run_mode {
                return;
            }
            connectivity.run_mode = run_mode;
        }

        tracing::debug!("Run mode changed to {:?}", run_mode);
        match run_mode {
            RunMode::Background => self
                .synchronizer
                .set_mode(StreamingMode::Polling, self.options.polling_interval_background),
            RunMode::Foreground => self
                .synchronizer
                .set_mode(self.options.streaming_mode, self.options.polling_interval_foreground),
        }
        self.apply_connectivity();
    }

    fn apply_connectivity(&self) {
        let online = {
            let connectivity = self.connectivity.lock();
            connectivity.started
                && connectivity.online_intent
                && (connectivity.run_mode == RunMode::Foreground || self.options.enable_background_updates)
        };
        self.synchronizer.set_online(online);
        self.reporter.set_online(online);
    }

    /// Switches to `user`. Observers see the difference to that user's cached flags.
    pub fn identify(&self, user: UserContext) {
        tracing::info!("Identifying user {}", user.key);
        *self.user.write() = user.clone();
        self.synchronizer.set_user(user.clone());
        self.reporter.record_identify(&user);
    }

    pub fn user(&self) -> UserContext {
        self.user.read().clone()
    }

    pub fn bool_variation(&self, key: &str, default_value: bool) -> bool {
        self.typed_variation(key, FlagValue::Bool(default_value), FlagValue::as_bool)
            .unwrap_or(default_value)
    }

    pub fn int_variation(&self, key: &str, default_value: i64) -> i64 {
        self.typed_variation(key, FlagValue::from(default_value), FlagValue::as_int)
            .unwrap_or(default_value)
    }

    pub fn double_variation(&self, key: &str, default_value: f64) -> f64 {
        self.typed_variation(key, FlagValue::Number(default_value), FlagValue::as_number)
            .unwrap_or(default_value)
    }

    pub fn string_variation(&self, key: &str, default_value: &str) -> String {
        self.typed_variation(key, FlagValue::from(default_value), |v: &FlagValue| {
            v.as_string().map(str::to_string)
        })
        .unwrap_or_else(|| default_value.to_string())
    }

    pub fn json_variation(&self, key: &str, default_value: serde_json::Value) -> serde_json::Value {
        self.typed_variation(key, FlagValue::from(default_value.clone()), |v: &FlagValue| {
            Some(v.to_json())
        })
        .unwrap_or(default_value)
    }

    /// The raw flag value, or `default_value` when the flag is unknown.
    pub fn variation(&self, key: &str, default_value: FlagValue) -> FlagValue {
        self.typed_variation(key, default_value.clone(), |v: &FlagValue| Some(v.clone()))
            .unwrap_or(default_value)
    }

    /// Reads `key`, records the evaluation and returns the typed value if the
    /// flag exists with a matching type. On a mismatch the default is reported.
    fn typed_variation<T, F>(&self, key: &str, default_value: FlagValue, extract: F) -> Option<T>
    where
        F: Fn(&FlagValue) -> Option<T>,
    {
        let flags = self.targets.store.snapshot();
        let flag = flags.get(key);
        let typed = flag.and_then(|f| extract(&f.value));

        let reported = match (flag, typed.is_some()) {
            (Some(f), true) => f.value.clone(),
            _ => default_value.clone(),
        };
        if flag.is_some() && typed.is_none() {
            tracing::debug!("Flag {} has an unexpected type, serving default", key);
        }

        self.reporter
            .record_flag_evaluation(key, reported, default_value, flag, &self.user.read());
        typed
    }

    pub fn all_flags(&self) -> HashMap<String, FlagValue> {
        self.targets.store.snapshot().values()
    }

    pub fn flags(&self) -> FlagStore {
        self.targets.store.snapshot()
    }

    /// Calls `handler` whenever `key` changes, for as long as `owner` is alive.
    pub fn observe<O, F>(&self, key: impl Into<String>, owner: &Arc<O>, handler: F)
    where
        O: Any + Send + Sync,
        F: Fn(&[FlagChange]) + Send + Sync + 'static,
    {
        self.observe_keys(ObservedKeys::single(key), owner, handler);
    }

    pub fn observe_keys<O, F>(&self, keys: ObservedKeys, owner: &Arc<O>, handler: F)
    where
        O: Any + Send + Sync,
        F: Fn(&[FlagChange]) + Send + Sync + 'static,
    {
        let handler: ChangeHandler = Arc::new(handler);
        self.targets
            .notifier
            .add_observer(FlagChangeObserver::new(keys, owner, handler));
    }

    pub fn observe_all<O, F>(&self, owner: &Arc<O>, handler: F)
    where
        O: Any + Send + Sync,
        F: Fn(&[FlagChange]) + Send + Sync + 'static,
    {
        self.observe_keys(ObservedKeys::All, owner, handler);
    }

    /// Calls `handler` after a sync that left every flag unchanged.
    pub fn observe_flags_unchanged<O, F>(&self, owner: &Arc<O>, handler: F)
    where
        O: Any + Send + Sync,
        F: Fn() + Send + Sync + 'static,
    {
        self.targets.notifier.add_unchanged_observer(owner, Arc::new(handler));
    }

    pub fn stop_observing<O: Any + Send + Sync>(&self, owner: &Arc<O>) {
        self.targets.notifier.remove_observers(owner);
    }

    pub fn track(&self, name: impl Into<String>, data: Option<serde_json::Value>) {
        self.reporter.record_custom(name, data, None, &self.user.read());
    }

    pub fn track_metric(&self, name: impl Into<String>, data: Option<serde_json::Value>, metric_value: f64) {
        self.reporter
            .record_custom(name, data, Some(metric_value), &self.user.read());
    }

    pub async fn flush(&self) -> Result<()> {
        self.reporter.flush().await
    }

    pub fn connection_information(&self) -> ConnectionInformation {
        self.synchronizer.connection_information()
    }

    pub fn event_diagnostics(&self) -> ReporterDiagnostics {
        self.reporter.diagnostics()
    }

    pub fn queued_event_count(&self) -> usize {
        self.reporter.queue_len()
    }

    /// Flushes pending events and goes offline.
    pub async fn close(&self) {
        if let Err(e) = self.reporter.flush().await {
            tracing::warn!("Final event flush failed: {}", e);
        }
        {
            let mut connectivity = self.connectivity.lock();
            connectivity.started = false;
            connectivity.online_intent = false;
        }
        self.synchronizer.stop();
        self.reporter.set_online(false);
        tracing::info!("Flag client closed");
    }
}
