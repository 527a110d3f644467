//! Flag synchronizer.
//!
//! Keeps the flag store current by either holding a push stream open or
//! polling the service on a fixed interval. Every accepted payload replaces
//! the store, is written to the persistent cache, recorded in the connection
//! information and diffed for observers.
//!
//! Each `start()` opens a new generation. Work belonging to an older
//! generation (a response that arrives after `stop()`, or a reconnect timer
//! that fires after a restart) is discarded.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::core::backend::{FlagService, StreamMessage};
use crate::core::change_notifier::FlagChangeNotifier;
use crate::core::config::{timer_period, ClientOptions, StreamingMode};
use crate::core::connection_info::{ConnectionInfoCell, ConnectionInformation, ConnectionMode};
use crate::core::flag_cache::PersistentFlagCache;
use crate::core::flag_store::{FlagStore, FlagStoreCell};
use crate::core::throttler::Throttler;
use crate::error::{ErrorCode, SyncError};
use crate::types::UserContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Offline,
    EstablishingStream,
    Streaming,
    Polling,
    StreamingFailedRetrying,
}

#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
    pub mode: StreamingMode,
    pub polling_interval: Duration,
    pub backoff_base_delay: Duration,
    pub backoff_max_delay: Duration,
    pub stream_read_timeout: Option<Duration>,
}

impl SynchronizerConfig {
    /// Foreground settings from the client options.
    pub fn from_options(options: &ClientOptions) -> Self {
        Self {
            mode: options.streaming_mode,
            polling_interval: options.polling_interval_foreground,
            backoff_base_delay: options.backoff_base_delay,
            backoff_max_delay: options.backoff_max_delay,
            stream_read_timeout: options.stream_read_timeout,
        }
    }
}

/// The data holders the synchronizer writes to. They outlive any restart.
#[derive(Clone)]
pub struct SyncTargets {
    pub store: Arc<FlagStoreCell>,
    pub notifier: Arc<FlagChangeNotifier>,
    pub connection: Arc<ConnectionInfoCell>,
    pub cache: Option<Arc<PersistentFlagCache>>,
}

impl SyncTargets {
    pub fn new(cache: Option<Arc<PersistentFlagCache>>) -> Self {
        Self {
            store: Arc::new(FlagStoreCell::default()),
            notifier: Arc::new(FlagChangeNotifier::new()),
            connection: Arc::new(ConnectionInfoCell::new()),
            cache,
        }
    }
}

struct SyncSettings {
    mode: StreamingMode,
    polling_interval: Duration,
    user: UserContext,
}

struct Control {
    running: bool,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

struct SyncInner {
    service: Arc<dyn FlagService>,
    targets: SyncTargets,
    throttler: Throttler,
    stream_read_timeout: Option<Duration>,
    settings: Mutex<SyncSettings>,
    state: Mutex<SyncState>,
    // Lock order: control before settings.
    control: Mutex<Control>,
}

pub struct FlagSynchronizer {
    inner: Arc<SyncInner>,
}

impl FlagSynchronizer {
    pub fn new(service: Arc<dyn FlagService>, targets: SyncTargets, config: SynchronizerConfig, user: UserContext) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                service,
                targets,
                throttler: Throttler::new(config.backoff_base_delay, config.backoff_max_delay),
                stream_read_timeout: config.stream_read_timeout,
                settings: Mutex::new(SyncSettings {
                    mode: config.mode,
                    polling_interval: config.polling_interval,
                    user,
                }),
                state: Mutex::new(SyncState::Offline),
                control: Mutex::new(Control {
                    running: false,
                    generation: 0,
                    task: None,
                }),
            }),
        }
    }

    /// Begins synchronizing in the configured mode. No-op when already running.
    pub fn start(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("Cannot start flag synchronizer outside a tokio runtime");
            return;
        }

        let (generation, mode, interval) = {
            let mut control = self.inner.control.lock();
            if control.running {
                return;
            }
            control.running = true;
            control.generation += 1;
            let settings = self.inner.settings.lock();
            (control.generation, settings.mode, settings.polling_interval)
        };

        tracing::info!("Flag synchronizer starting in {:?} mode", mode);
        match mode {
            StreamingMode::Streaming => self.inner.spawn_stream(generation),
            StreamingMode::Polling => self.inner.spawn_polling(generation, interval),
        }
    }

    /// Closes the stream, cancels pending reconnects and poll timers. Idempotent.
    pub fn stop(&self) {
        let (was_running, task) = {
            let mut control = self.inner.control.lock();
            let was_running = control.running;
            control.running = false;
            control.generation += 1;
            (was_running, control.task.take())
        };

        if let Some(task) = task {
            task.abort();
        }
        self.inner.throttler.reset();
        *self.inner.state.lock() = SyncState::Offline;
        self.inner.targets.connection.set_mode(ConnectionMode::Offline);

        if was_running {
            tracing::info!("Flag synchronizer stopped");
        }
    }

    pub fn set_online(&self, online: bool) {
        if online {
            self.start();
        } else {
            self.stop();
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.control.lock().running
    }

    /// Changes the target mode and polling interval, restarting if running.
    /// Flags, cache and observers are unaffected.
    pub fn set_mode(&self, mode: StreamingMode, polling_interval: Duration) {
        let changed = {
            let mut settings = self.inner.settings.lock();
            let changed = settings.mode != mode || settings.polling_interval != polling_interval;
            settings.mode = mode;
            settings.polling_interval = polling_interval;
            changed
        };

        if changed && self.is_online() {
            tracing::info!("Switching flag synchronizer to {:?} mode ({:?})", mode, polling_interval);
            self.stop();
            self.start();
        }
    }

    /// Switches to `user`: serves that user's cached flags (notifying observers
    /// of the difference) and restarts synchronization if it was running.
    pub fn set_user(&self, user: UserContext) {
        let was_running = self.is_online();
        if was_running {
            self.stop();
        }

        let identity = user.identity();
        self.inner.settings.lock().user = user;

        let cached = match &self.inner.targets.cache {
            Some(cache) => cache.retrieve(&identity).unwrap_or_else(|e| {
                tracing::warn!("Failed to read cached flags for {}: {}", identity, e);
                None
            }),
            None => None,
        };
        if cached.is_some() {
            tracing::debug!("Loaded cached flags for {}", identity);
        }

        let next = cached.unwrap_or_default();
        let previous = self.inner.targets.store.replace(next.clone());
        if previous != next {
            self.inner.targets.notifier.notify(&previous, &next);
        }

        if was_running {
            self.start();
        }
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state.lock()
    }

    pub fn mode(&self) -> StreamingMode {
        self.inner.settings.lock().mode
    }

    pub fn polling_interval(&self) -> Duration {
        self.inner.settings.lock().polling_interval
    }

    pub fn user(&self) -> UserContext {
        self.inner.settings.lock().user.clone()
    }

    pub fn flags(&self) -> FlagStore {
        self.inner.targets.store.snapshot()
    }

    pub fn connection_information(&self) -> ConnectionInformation {
        self.inner.targets.connection.snapshot()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.throttler.attempts()
    }
}

impl Drop for FlagSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SyncInner {
    fn is_current(&self, generation: u64) -> bool {
        let control = self.control.lock();
        control.running && control.generation == generation
    }

    fn adopt_task(&self, generation: u64, handle: JoinHandle<()>) {
        let mut control = self.control.lock();
        if control.running && control.generation == generation {
            if let Some(previous) = control.task.replace(handle) {
                previous.abort();
            }
        } else {
            handle.abort();
        }
    }

    fn spawn_stream(self: &Arc<Self>, generation: u64) {
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move { inner.run_stream(generation).await });
        self.adopt_task(generation, handle);
    }

    fn spawn_polling(self: &Arc<Self>, generation: u64, interval: Duration) {
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move { inner.run_polling(generation, interval).await });
        self.adopt_task(generation, handle);
    }

    fn enter_state(&self, generation: u64, state: SyncState, mode: ConnectionMode) -> bool {
        let control = self.control.lock();
        if !(control.running && control.generation == generation) {
            return false;
        }
        *self.state.lock() = state;
        self.targets.connection.set_mode(mode);
        true
    }

    fn record_failure(&self, generation: u64, error: &SyncError, mode: ConnectionMode) -> bool {
        let control = self.control.lock();
        if !(control.running && control.generation == generation) {
            return false;
        }
        self.targets.connection.record_failure(error, mode);
        true
    }

    /// Replaces the store with `build(current)` if `generation` is still live.
    ///
    /// The swap and success bookkeeping happen under the control lock. The
    /// cache write and observer notification follow once it is released; a
    /// single generation applies updates from one task, so they stay in order.
    fn apply<F>(&self, generation: u64, mode: ConnectionMode, build: F) -> bool
    where
        F: FnOnce(&FlagStore) -> Option<FlagStore>,
    {
        let (previous, next, identity) = {
            let control = self.control.lock();
            if !(control.running && control.generation == generation) {
                tracing::debug!("Ignoring flag update from superseded generation {}", generation);
                return false;
            }

            let current = self.targets.store.snapshot();
            let Some(next) = build(&current) else {
                return false;
            };

            let previous = self.targets.store.replace(next.clone());
            let identity = self.settings.lock().user.identity();
            self.targets.connection.record_success(mode);
            self.throttler.signal_success();
            (previous, next, identity)
        };

        if let Some(cache) = &self.targets.cache {
            if let Err(e) = cache.store(&identity, &next) {
                tracing::warn!("Failed to persist flags for {}: {}", identity, e);
            }
        }

        self.targets.notifier.notify(&previous, &next);
        true
    }

    async fn run_stream(self: Arc<Self>, generation: u64) {
        if !self.enter_state(generation, SyncState::EstablishingStream, ConnectionMode::EstablishingStreaming) {
            return;
        }

        let user = self.settings.lock().user.clone();
        let mut stream = match self.service.open_event_stream(&user).await {
            Ok(stream) => stream,
            Err(e) => {
                self.stream_failed(generation, e);
                return;
            }
        };

        if !self.enter_state(generation, SyncState::Streaming, ConnectionMode::Streaming) {
            return;
        }
        tracing::info!("Flag stream connected");

        loop {
            let next = match self.stream_read_timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.stream_failed(
                            generation,
                            SyncError::new(ErrorCode::StreamReadTimeout, format!("No stream data for {:?}", limit)),
                        );
                        return;
                    }
                },
                None => stream.next().await,
            };

            match next {
                Some(Ok(message)) => self.handle_message(generation, &user, message).await,
                Some(Err(e)) => {
                    self.stream_failed(generation, e);
                    return;
                }
                None => {
                    self.stream_failed(
                        generation,
                        SyncError::new(ErrorCode::StreamClosed, "Flag stream closed by server"),
                    );
                    return;
                }
            }

            if !self.is_current(generation) {
                return;
            }
        }
    }

    async fn handle_message(&self, generation: u64, user: &UserContext, message: StreamMessage) {
        match message {
            StreamMessage::Put(flags) => {
                tracing::debug!("Stream put with {} flags", flags.len());
                self.apply(generation, ConnectionMode::Streaming, move |_| Some(flags));
            }
            StreamMessage::Patch { key, record } => {
                if !self.apply(generation, ConnectionMode::Streaming, |current| current.with_patch(&key, record)) {
                    tracing::debug!("Ignored stale patch for {}", key);
                }
            }
            StreamMessage::Delete { key, version } => {
                if !self.apply(generation, ConnectionMode::Streaming, |current| current.with_delete(&key, version)) {
                    tracing::debug!("Ignored stale delete for {}", key);
                }
            }
            StreamMessage::Ping => match self.service.fetch_flags(user).await {
                Ok(flags) => {
                    self.apply(generation, ConnectionMode::Streaming, move |_| Some(flags));
                }
                Err(e) => {
                    tracing::warn!("Flag fetch after ping failed: {}", e);
                    self.record_failure(generation, &e, ConnectionMode::Streaming);
                }
            },
        }
    }

    fn stream_failed(self: &Arc<Self>, generation: u64, error: SyncError) {
        {
            let control = self.control.lock();
            if !(control.running && control.generation == generation) {
                return;
            }
            self.targets.connection.record_failure(&error, ConnectionMode::StreamingFailed);
            *self.state.lock() = SyncState::StreamingFailedRetrying;
        }

        tracing::warn!("Flag stream failed: {}", error);

        let inner = Arc::clone(self);
        let delay = self.throttler.run_after_delay(move || async move {
            if inner.is_current(generation) {
                inner.spawn_stream(generation);
            }
        });
        tracing::info!("Reconnecting flag stream in {:?}", delay);
    }

    async fn run_polling(self: Arc<Self>, generation: u64, interval: Duration) {
        if !self.enter_state(generation, SyncState::Polling, ConnectionMode::Polling) {
            return;
        }

        // First tick fires immediately; later ticks keep a fixed cadence regardless of failures.
        let mut ticker = tokio::time::interval(timer_period(interval));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.is_current(generation) {
                return;
            }

            let user = self.settings.lock().user.clone();
            match self.service.fetch_flags(&user).await {
                Ok(flags) => {
                    tracing::debug!("Poll returned {} flags", flags.len());
                    self.apply(generation, ConnectionMode::Polling, move |_| Some(flags));
                }
                Err(e) => {
                    tracing::warn!("Flag poll failed: {}", e);
                    self.record_failure(generation, &e, ConnectionMode::Polling);
                }
            }
        }
    }
}
