#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flagkit_sync::{
    ErrorCode, EventBatch, FlagEventStream, FlagRecord, FlagService, FlagStore, Result, StreamMessage, SyncError,
    UserContext,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub type StreamSender = mpsc::UnboundedSender<Result<StreamMessage>>;

enum ScriptedStream {
    Open(mpsc::UnboundedReceiver<Result<StreamMessage>>),
    Fail(SyncError),
}

/// Scripted `FlagService`. Responses are consumed in order; an exhausted script
/// answers with a network error.
#[derive(Default)]
pub struct MockFlagService {
    fetches: Mutex<VecDeque<Result<FlagStore>>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    publish_results: Mutex<VecDeque<Result<()>>>,
    fetch_delay: Mutex<Option<Duration>>,
    pub fetch_count: AtomicUsize,
    pub open_count: AtomicUsize,
    pub publish_count: AtomicUsize,
    pub published: Mutex<Vec<EventBatch>>,
    pub users_seen: Mutex<Vec<String>>,
}

impl MockFlagService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_fetch(&self, result: Result<FlagStore>) {
        self.fetches.lock().push_back(result);
    }

    pub fn push_stream(&self) -> StreamSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().push_back(ScriptedStream::Open(rx));
        tx
    }

    pub fn push_stream_error(&self, error: SyncError) {
        self.streams.lock().push_back(ScriptedStream::Fail(error));
    }

    pub fn push_publish_result(&self, result: Result<()>) {
        self.publish_results.lock().push_back(result);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = Some(delay);
    }

    pub fn fetches(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn publishes(&self) -> usize {
        self.publish_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlagService for MockFlagService {
    async fn fetch_flags(&self, user: &UserContext) -> Result<FlagStore> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.users_seen.lock().push(user.key.clone());
        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.fetches.lock().pop_front();
        next.unwrap_or_else(|| Err(SyncError::new(ErrorCode::NetworkError, "no scripted fetch")))
    }

    async fn open_event_stream(&self, user: &UserContext) -> Result<FlagEventStream> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        self.users_seen.lock().push(user.key.clone());
        let next = self.streams.lock().pop_front();
        match next {
            Some(ScriptedStream::Open(rx)) => {
                let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                });
                Ok(Box::pin(stream))
            }
            Some(ScriptedStream::Fail(error)) => Err(error),
            None => Err(SyncError::new(ErrorCode::NetworkError, "no scripted stream")),
        }
    }

    async fn publish_events(&self, batch: &EventBatch) -> Result<()> {
        self.publish_count.fetch_add(1, Ordering::SeqCst);
        let next = self.publish_results.lock().pop_front().unwrap_or(Ok(()));
        if next.is_ok() {
            self.published.lock().push(batch.clone());
        }
        next
    }
}

pub fn store(entries: &[(&str, FlagRecord)]) -> FlagStore {
    entries
        .iter()
        .map(|(key, record)| (key.to_string(), record.clone()))
        .collect()
}

/// Routes `tracing` output to the test harness, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
