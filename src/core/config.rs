use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ErrorCode, Result, SyncError};

pub const DEFAULT_BASE_URL: &str = "https://sdk.flagkit.dev";
pub const DEFAULT_STREAM_URL: &str = "https://stream.flagkit.dev";
pub const DEFAULT_EVENTS_URL: &str = "https://events.flagkit.dev";
pub const DEFAULT_POLLING_INTERVAL_FOREGROUND: Duration = Duration::from_secs(300);
pub const DEFAULT_POLLING_INTERVAL_BACKGROUND: Duration = Duration::from_secs(3600);
pub const DEFAULT_EVENT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CACHED_USERS: usize = 5;
pub const DEFAULT_MAX_EVENT_QUEUE_SIZE: usize = 100;
pub const DEFAULT_EVENT_PUBLISH_ATTEMPTS: u32 = 2;
pub const DEFAULT_BACKOFF_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_MAX_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STREAM_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Shortest period used by the polling and flush timers.
pub(crate) const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

/// `period` raised to [`MIN_TIMER_PERIOD`]; tokio intervals reject zero.
pub(crate) fn timer_period(period: Duration) -> Duration {
    if period < MIN_TIMER_PERIOD {
        tracing::warn!("Timer period {:?} is too short, using {:?}", period, MIN_TIMER_PERIOD);
        return MIN_TIMER_PERIOD;
    }
    period
}

/// How the synchronizer keeps flags current while online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamingMode {
    #[default]
    Streaming,
    Polling,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_key: String,
    pub base_url: String,
    pub stream_url: String,
    pub events_url: String,
    pub streaming_mode: StreamingMode,
    pub polling_interval_foreground: Duration,
    pub polling_interval_background: Duration,
    pub event_flush_interval: Duration,
    pub max_cached_users: usize,
    pub max_event_queue_size: usize,
    pub event_publish_attempts: u32,
    pub backoff_base_delay: Duration,
    pub backoff_max_delay: Duration,
    pub enable_background_updates: bool,
    pub start_online: bool,
    pub connection_timeout: Duration,
    /// A stream that stays silent longer than this is treated as failed.
    pub stream_read_timeout: Option<Duration>,
    pub all_attributes_private: bool,
    pub private_attribute_names: Vec<String>,
    /// Directory for the persistent flag cache. In-memory storage when unset.
    pub cache_directory: Option<PathBuf>,
}

impl ClientOptions {
    pub fn new(api_key: impl Into<String>) -> Self {
        ClientOptionsBuilder::new(api_key).build()
    }

    pub fn builder(api_key: impl Into<String>) -> ClientOptionsBuilder {
        ClientOptionsBuilder::new(api_key)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(SyncError::config_error(
                ErrorCode::ConfigInvalidApiKey,
                "API key is required",
            ));
        }

        for (name, url) in [
            ("base_url", &self.base_url),
            ("stream_url", &self.stream_url),
            ("events_url", &self.events_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(SyncError::config_error(
                    ErrorCode::ConfigInvalidUrl,
                    format!("{} must be an http(s) URL: {}", name, url),
                ));
            }
        }

        for (name, interval) in [
            ("polling_interval_foreground", self.polling_interval_foreground),
            ("polling_interval_background", self.polling_interval_background),
            ("event_flush_interval", self.event_flush_interval),
            ("connection_timeout", self.connection_timeout),
        ] {
            if interval.is_zero() {
                return Err(SyncError::config_error(
                    ErrorCode::ConfigInvalidInterval,
                    format!("{} must be positive", name),
                ));
            }
        }

        if self.stream_read_timeout.is_some_and(|t| t.is_zero()) {
            return Err(SyncError::config_error(
                ErrorCode::ConfigInvalidInterval,
                "stream_read_timeout must be positive when set",
            ));
        }

        if self.backoff_base_delay.is_zero() || self.backoff_base_delay > self.backoff_max_delay {
            return Err(SyncError::config_error(
                ErrorCode::ConfigInvalidBackoff,
                "backoff_base_delay must be positive and not exceed backoff_max_delay",
            ));
        }

        if self.max_event_queue_size == 0 {
            return Err(SyncError::config_error(
                ErrorCode::ConfigInvalidCapacity,
                "max_event_queue_size must be at least 1",
            ));
        }

        if self.event_publish_attempts == 0 {
            return Err(SyncError::config_error(
                ErrorCode::ConfigInvalidCapacity,
                "event_publish_attempts must be at least 1",
            ));
        }

        Ok(())
    }
}

pub struct ClientOptionsBuilder {
    api_key: String,
    base_url: Option<String>,
    stream_url: Option<String>,
    events_url: Option<String>,
    streaming_mode: Option<StreamingMode>,
    polling_interval_foreground: Option<Duration>,
    polling_interval_background: Option<Duration>,
    event_flush_interval: Option<Duration>,
    max_cached_users: Option<usize>,
    max_event_queue_size: Option<usize>,
    event_publish_attempts: Option<u32>,
    backoff_base_delay: Option<Duration>,
    backoff_max_delay: Option<Duration>,
    enable_background_updates: Option<bool>,
    start_online: Option<bool>,
    connection_timeout: Option<Duration>,
    stream_read_timeout: Option<Option<Duration>>,
    all_attributes_private: bool,
    private_attribute_names: Vec<String>,
    cache_directory: Option<PathBuf>,
}

impl ClientOptionsBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            stream_url: None,
            events_url: None,
            streaming_mode: None,
            polling_interval_foreground: None,
            polling_interval_background: None,
            event_flush_interval: None,
            max_cached_users: None,
            max_event_queue_size: None,
            event_publish_attempts: None,
            backoff_base_delay: None,
            backoff_max_delay: None,
            enable_background_updates: None,
            start_online: None,
            connection_timeout: None,
            stream_read_timeout: None,
            all_attributes_private: false,
            private_attribute_names: Vec::new(),
            cache_directory: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }

    pub fn events_url(mut self, url: impl Into<String>) -> Self {
        self.events_url = Some(url.into());
        self
    }

    /// Points all three endpoints at one host; handy for tests and proxies.
    pub fn all_urls(self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.base_url(url.clone()).stream_url(url.clone()).events_url(url)
    }

    pub fn streaming_mode(mut self, mode: StreamingMode) -> Self {
        self.streaming_mode = Some(mode);
        self
    }

    pub fn polling_interval_foreground(mut self, interval: Duration) -> Self {
        self.polling_interval_foreground = Some(interval);
        self
    }

    pub fn polling_interval_background(mut self, interval: Duration) -> Self {
        self.polling_interval_background = Some(interval);
        self
    }

    pub fn event_flush_interval(mut self, interval: Duration) -> Self {
        self.event_flush_interval = Some(interval);
        self
    }

    pub fn max_cached_users(mut self, count: usize) -> Self {
        self.max_cached_users = Some(count);
        self
    }

    pub fn max_event_queue_size(mut self, size: usize) -> Self {
        self.max_event_queue_size = Some(size);
        self
    }

    pub fn event_publish_attempts(mut self, attempts: u32) -> Self {
        self.event_publish_attempts = Some(attempts);
        self
    }

    pub fn backoff_base_delay(mut self, delay: Duration) -> Self {
        self.backoff_base_delay = Some(delay);
        self
    }

    pub fn backoff_max_delay(mut self, delay: Duration) -> Self {
        self.backoff_max_delay = Some(delay);
        self
    }

    pub fn enable_background_updates(mut self, enabled: bool) -> Self {
        self.enable_background_updates = Some(enabled);
        self
    }

    pub fn start_online(mut self, online: bool) -> Self {
        self.start_online = Some(online);
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// `None` disables the read timeout.
    pub fn stream_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_read_timeout = Some(timeout);
        self
    }

    pub fn all_attributes_private(mut self, private: bool) -> Self {
        self.all_attributes_private = private;
        self
    }

    pub fn private_attribute_name(mut self, name: impl Into<String>) -> Self {
        self.private_attribute_names.push(name.into());
        self
    }

    pub fn cache_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_directory = Some(dir.into());
        self
    }

    pub fn build(self) -> ClientOptions {
        ClientOptions {
            api_key: self.api_key,
            base_url: self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            stream_url: self.stream_url.unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            events_url: self.events_url.unwrap_or_else(|| DEFAULT_EVENTS_URL.to_string()),
            streaming_mode: self.streaming_mode.unwrap_or_default(),
            polling_interval_foreground: self
                .polling_interval_foreground
                .unwrap_or(DEFAULT_POLLING_INTERVAL_FOREGROUND),
            polling_interval_background: self
                .polling_interval_background
                .unwrap_or(DEFAULT_POLLING_INTERVAL_BACKGROUND),
            event_flush_interval: self.event_flush_interval.unwrap_or(DEFAULT_EVENT_FLUSH_INTERVAL),
            max_cached_users: self.max_cached_users.unwrap_or(DEFAULT_MAX_CACHED_USERS),
            max_event_queue_size: self.max_event_queue_size.unwrap_or(DEFAULT_MAX_EVENT_QUEUE_SIZE),
            event_publish_attempts: self
                .event_publish_attempts
                .unwrap_or(DEFAULT_EVENT_PUBLISH_ATTEMPTS),
            backoff_base_delay: self.backoff_base_delay.unwrap_or(DEFAULT_BACKOFF_BASE_DELAY),
            backoff_max_delay: self.backoff_max_delay.unwrap_or(DEFAULT_BACKOFF_MAX_DELAY),
            enable_background_updates: self.enable_background_updates.unwrap_or(true),
            start_online: self.start_online.unwrap_or(true),
            connection_timeout: self.connection_timeout.unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
            stream_read_timeout: self
                .stream_read_timeout
                .unwrap_or(Some(DEFAULT_STREAM_READ_TIMEOUT)),
            all_attributes_private: self.all_attributes_private,
            private_attribute_names: self.private_attribute_names,
            cache_directory: self.cache_directory,
        }
    }
}
