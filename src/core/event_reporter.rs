//! Event reporter for batching and publishing analytics events.
//!
//! Flag evaluations are always tallied into summary counters; raw feature
//! events are queued only for flags that ask for them. The queue, together
//! with a summary of the counters, is published as one batch when `flush()`
//! is called or the flush timer fires. A batch that cannot be delivered
//! within the configured number of attempts is dropped.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::core::backend::FlagService;
use crate::core::config::{timer_period, ClientOptions, DEFAULT_EVENT_FLUSH_INTERVAL, DEFAULT_EVENT_PUBLISH_ATTEMPTS, DEFAULT_MAX_EVENT_QUEUE_SIZE};
use crate::core::connection_info::FailureInfo;
use crate::core::events::{CustomEvent, Event, EventBatch, FeatureEvent, IdentifyEvent, SummaryEvent};
use crate::core::flag_counter::FlagRequestTracker;
use crate::error::{ErrorCode, Result};
use crate::http::retry::{is_retryable, retry_limit_error, with_retry_detailed, RetryConfig};
use crate::types::{FlagRecord, FlagValue, RedactedUser, UserContext};

#[derive(Debug, Clone)]
pub struct EventReporterConfig {
    /// Interval between automatic flushes. Default: 30 seconds
    pub flush_interval: Duration,

    /// Maximum number of queued events; the oldest is dropped beyond this. Default: 100
    pub max_queue_size: usize,

    /// Publish attempts per batch before it is dropped. Default: 2
    pub publish_attempts: u32,

    pub all_attributes_private: bool,
    pub private_attribute_names: Vec<String>,
}

impl Default for EventReporterConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_EVENT_FLUSH_INTERVAL,
            max_queue_size: DEFAULT_MAX_EVENT_QUEUE_SIZE,
            publish_attempts: DEFAULT_EVENT_PUBLISH_ATTEMPTS,
            all_attributes_private: false,
            private_attribute_names: Vec::new(),
        }
    }
}

impl From<&ClientOptions> for EventReporterConfig {
    fn from(options: &ClientOptions) -> Self {
        Self {
            flush_interval: options.event_flush_interval,
            max_queue_size: options.max_event_queue_size,
            publish_attempts: options.event_publish_attempts,
            all_attributes_private: options.all_attributes_private,
            private_attribute_names: options.private_attribute_names.clone(),
        }
    }
}

/// Publishing health, for observability only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReporterDiagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_flush_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_publish_failure: Option<FailureInfo>,
    pub published_batches: u64,
    /// Events lost to queue overflow or failed publishes.
    pub dropped_events: u64,
}

struct ReporterState {
    events: VecDeque<Event>,
    tracker: FlagRequestTracker,
}

struct ReporterShared {
    config: EventReporterConfig,
    service: Arc<dyn FlagService>,
    state: Mutex<ReporterState>,
    online: AtomicBool,
    diagnostics: Mutex<ReporterDiagnostics>,
    flush_lock: tokio::sync::Mutex<()>,
}

pub struct EventReporter {
    shared: Arc<ReporterShared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl EventReporter {
    /// Creates an offline reporter. Nothing is published until `set_online(true)`.
    pub fn new(config: EventReporterConfig, service: Arc<dyn FlagService>) -> Self {
        Self {
            shared: Arc::new(ReporterShared {
                config,
                service,
                state: Mutex::new(ReporterState {
                    events: VecDeque::new(),
                    tracker: FlagRequestTracker::new(),
                }),
                online: AtomicBool::new(false),
                diagnostics: Mutex::new(ReporterDiagnostics::default()),
                flush_lock: tokio::sync::Mutex::new(()),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Tallies an evaluation, and queues a feature event when the flag tracks events.
    pub fn record_flag_evaluation(
        &self,
        key: &str,
        value: FlagValue,
        default_value: FlagValue,
        flag: Option<&FlagRecord>,
        user: &UserContext,
    ) {
        let feature_event = flag
            .filter(|f| f.track_events)
            .map(|f| FeatureEvent::new(key, value.clone(), default_value.clone(), f, self.redact(user)));

        let mut state = self.shared.state.lock();
        state.tracker.track_request(key, value, flag, default_value);
        if let Some(event) = feature_event {
            self.shared.push(&mut state, Event::Feature(event));
        }
    }

    pub fn record_custom(&self, name: impl Into<String>, data: Option<serde_json::Value>, metric_value: Option<f64>, user: &UserContext) {
        let name = name.into();
        if name.is_empty() {
            tracing::warn!("Ignoring custom event with empty name");
            return;
        }
        self.record(Event::Custom(CustomEvent {
            key: name,
            creation_date: Utc::now(),
            user: self.redact(user),
            data,
            metric_value,
        }));
    }

    pub fn record_identify(&self, user: &UserContext) {
        self.record(Event::Identify(IdentifyEvent {
            key: user.key.clone(),
            creation_date: Utc::now(),
            user: self.redact(user),
        }));
    }

    pub fn record(&self, event: Event) {
        let mut state = self.shared.state.lock();
        self.shared.push(&mut state, event);
    }

    /// Publishes queued events plus the counter summary.
    ///
    /// A no-op while offline or when there is nothing to send. On failure the
    /// batch is dropped and the error returned.
    pub async fn flush(&self) -> Result<()> {
        self.shared.flush().await
    }

    pub fn set_online(&self, online: bool) {
        let was_online = self.shared.online.swap(online, Ordering::SeqCst);
        if online {
            self.start_timer();
        } else {
            self.stop_timer();
        }
        if was_online != online {
            tracing::debug!("Event reporter {}", if online { "online" } else { "offline" });
        }
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().events.len()
    }

    pub fn queued_events(&self) -> Vec<Event> {
        self.shared.state.lock().events.iter().cloned().collect()
    }

    pub fn has_counters(&self) -> bool {
        self.shared.state.lock().tracker.has_data()
    }

    pub fn tracker(&self) -> FlagRequestTracker {
        self.shared.state.lock().tracker.clone()
    }

    pub fn diagnostics(&self) -> ReporterDiagnostics {
        self.shared.diagnostics.lock().clone()
    }

    fn redact(&self, user: &UserContext) -> RedactedUser {
        user.redacted(
            self.shared.config.all_attributes_private,
            &self.shared.config.private_attribute_names,
        )
    }

    fn start_timer(&self) {
        let mut timer = self.timer.lock();
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No tokio runtime available, periodic event flush disabled");
            return;
        };

        let shared: Weak<ReporterShared> = Arc::downgrade(&self.shared);
        let period = timer_period(self.shared.config.flush_interval);

        *timer = Some(runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                if let Err(e) = shared.flush().await {
                    tracing::debug!("Periodic flush failed: {}", e);
                }
            }
        }));
    }

    fn stop_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for EventReporter {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}

impl ReporterShared {
    fn push(&self, state: &mut ReporterState, event: Event) {
        if state.events.len() >= self.config.max_queue_size {
            state.events.pop_front();
            self.diagnostics.lock().dropped_events += 1;
            tracing::warn!("Event queue full, dropping oldest event");
        }
        state.events.push_back(event);
    }

    fn take_batch(&self) -> Option<EventBatch> {
        let mut state = self.state.lock();
        if state.events.is_empty() && !state.tracker.has_data() {
            return None;
        }

        let mut events: Vec<Event> = state.events.drain(..).collect();
        let tracker = std::mem::take(&mut state.tracker);
        if tracker.has_data() {
            events.push(Event::Summary(SummaryEvent {
                start_date: tracker.start_date,
                end_date: Utc::now(),
                features: tracker.flag_counters.into_iter().collect::<BTreeMap<_, _>>(),
            }));
        }
        Some(EventBatch::new(events))
    }

    async fn flush(&self) -> Result<()> {
        if !self.online.load(Ordering::SeqCst) {
            tracing::debug!("Skipping flush while offline");
            return Ok(());
        }

        let _guard = self.flush_lock.lock().await;

        let Some(batch) = self.take_batch() else {
            return Ok(());
        };

        let retry = RetryConfig::new(self.config.publish_attempts);
        let outcome = with_retry_detailed(|| self.service.publish_events(&batch), &retry, is_retryable).await;

        match outcome.result {
            Ok(()) => {
                let mut diagnostics = self.diagnostics.lock();
                diagnostics.last_flush_at = Some(Utc::now());
                diagnostics.published_batches += 1;
                tracing::debug!("Published {} events", batch.len());
                Ok(())
            }
            Err(e) => {
                let error = retry_limit_error(ErrorCode::EventSendFailed, outcome.attempts, &e);
                let mut diagnostics = self.diagnostics.lock();
                diagnostics.last_publish_failure = Some(FailureInfo::from_error(&error));
                diagnostics.dropped_events += batch.len() as u64;
                tracing::warn!("Dropping {} events: {}", batch.len(), error);
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::FlagEventStream;
    use crate::core::flag_store::FlagStore;
    use crate::error::SyncError;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingService {
        batches: Mutex<Vec<EventBatch>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl FlagService for RecordingService {
        async fn fetch_flags(&self, _user: &UserContext) -> Result<FlagStore> {
            Ok(FlagStore::empty())
        }

        async fn open_event_stream(&self, _user: &UserContext) -> Result<FlagEventStream> {
            Err(SyncError::new(ErrorCode::NetworkError, "no stream"))
        }

        async fn publish_events(&self, batch: &EventBatch) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::new(ErrorCode::HttpBadRequest, "rejected"));
            }
            self.batches.lock().push(batch.clone());
            Ok(())
        }
    }

    fn reporter(max_queue_size: usize) -> (EventReporter, Arc<RecordingService>) {
        let service = Arc::new(RecordingService::default());
        let config = EventReporterConfig {
            max_queue_size,
            ..EventReporterConfig::default()
        };
        (EventReporter::new(config, service.clone()), service)
    }

    #[test]
    fn test_queue_drops_oldest() {
        let (reporter, _) = reporter(2);
        let user = UserContext::new("u1");
        reporter.record_custom("e1", None, None, &user);
        reporter.record_custom("e2", None, None, &user);
        reporter.record_custom("e3", None, None, &user);

        let keys: Vec<String> = reporter
            .queued_events()
            .into_iter()
            .map(|e| match e {
                Event::Custom(c) => c.key,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(keys, vec!["e2", "e3"]);
        assert_eq!(reporter.diagnostics().dropped_events, 1);
    }

    #[test]
    fn test_evaluation_without_track_events_only_counts() {
        let (reporter, _) = reporter(10);
        let user = UserContext::new("u1");
        let flag = FlagRecord::new(true);
        reporter.record_flag_evaluation("a", FlagValue::Bool(true), FlagValue::Bool(false), Some(&flag), &user);

        assert_eq!(reporter.queue_len(), 0);
        assert!(reporter.has_counters());
    }

    #[test]
    fn test_evaluation_with_track_events_queues_feature_event() {
        let (reporter, _) = reporter(10);
        let user = UserContext::new("u1");
        let flag = FlagRecord::new(true).with_track_events(true);
        reporter.record_flag_evaluation("a", FlagValue::Bool(true), FlagValue::Bool(false), Some(&flag), &user);

        assert_eq!(reporter.queue_len(), 1);
        assert_eq!(reporter.queued_events()[0].kind(), "feature");
    }

    #[tokio::test]
    async fn test_flush_offline_is_noop() {
        let (reporter, service) = reporter(10);
        reporter.record_identify(&UserContext::new("u1"));
        reporter.flush().await.unwrap();

        assert!(service.batches.lock().is_empty());
        assert_eq!(reporter.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_flush_publishes_events_and_summary() {
        let (reporter, service) = reporter(10);
        let user = UserContext::new("u1");
        reporter.set_online(true);
        reporter.record_identify(&user);
        reporter.record_flag_evaluation("a", FlagValue::Bool(true), FlagValue::Bool(false), None, &user);

        reporter.flush().await.unwrap();

        let batches = service.batches.lock();
        assert_eq!(batches.len(), 1);
        let kinds: Vec<&str> = batches[0].events.iter().map(Event::kind).collect();
        assert_eq!(kinds, vec!["identify", "summary"]);
        assert_eq!(reporter.queue_len(), 0);
        assert!(!reporter.has_counters());
        assert_eq!(reporter.diagnostics().published_batches, 1);
    }

    #[tokio::test]
    async fn test_failed_flush_drops_batch() {
        let (reporter, service) = reporter(10);
        service.fail.store(true, Ordering::SeqCst);
        reporter.set_online(true);
        reporter.record_identify(&UserContext::new("u1"));

        let err = reporter.flush().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::EventSendFailed);
        assert_eq!(reporter.queue_len(), 0);

        let diagnostics = reporter.diagnostics();
        assert_eq!(diagnostics.dropped_events, 1);
        assert!(diagnostics.last_publish_failure.is_some());
    }

    #[tokio::test]
    async fn test_empty_flush_does_not_publish() {
        let (reporter, service) = reporter(10);
        reporter.set_online(true);
        reporter.flush().await.unwrap();
        assert!(service.batches.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_only_while_online() {
        let (reporter, service) = reporter(10);
        let user = UserContext::new("u1");
        reporter.record_identify(&user);
        reporter.set_online(true);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(service.batches.lock().is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(service.batches.lock().len(), 1);

        reporter.set_online(false);
        reporter.record_custom("offline-click", None, None, &user);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(service.batches.lock().len(), 1);
        assert_eq!(reporter.queue_len(), 1);

        reporter.set_online(true);
        tokio::time::sleep(Duration::from_secs(31)).await;
        let batches = service.batches.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].events[0].kind(), "custom");
        assert_eq!(reporter.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_flush_interval_still_flushes() {
        let service = Arc::new(RecordingService::default());
        let config = EventReporterConfig {
            flush_interval: Duration::ZERO,
            ..EventReporterConfig::default()
        };
        let reporter = EventReporter::new(config, service.clone());
        reporter.record_identify(&UserContext::new("u1"));
        reporter.set_online(true);

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(service.batches.lock().len(), 1);
        assert_eq!(reporter.queue_len(), 0);
    }
}
