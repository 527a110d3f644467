//! Reconnection throttling.
//!
//! The throttler computes exponentially growing, jittered delays between
//! reconnection attempts and owns at most one delayed action at a time.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;

/// Lower bound of the random jitter factor applied to each delay.
pub const MIN_JITTER_FACTOR: f64 = 0.5;

/// Caps the exponent so `2^n` cannot overflow for long outages.
const MAX_EXPONENT: u32 = 31;

/// Exponential backoff with jitter and a single pending delayed action.
pub struct Throttler {
    base_delay: Duration,
    max_delay: Duration,
    attempts: AtomicU32,
    pending: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Throttler {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            attempts: AtomicU32::new(0),
            pending: parking_lot::Mutex::new(None),
        }
    }

    /// Un-jittered delay for attempt `attempt` (zero-based): `min(max, base * 2^attempt)`.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_EXPONENT);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Jittered delay for the next attempt; advances the attempt counter.
    pub fn delay_before_next_attempt(&self) -> Duration {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let nominal = self.nominal_delay(attempt);
        let factor = rand::thread_rng().gen_range(MIN_JITTER_FACTOR..=1.0);
        nominal.mul_f64(factor).min(self.max_delay)
    }

    /// Number of attempts since the last success.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Resets the backoff so the next delay starts from the base again.
    pub fn signal_success(&self) {
        let previous = self.attempts.swap(0, Ordering::SeqCst);
        if previous > 0 {
            tracing::debug!("Throttler reset after {} attempts", previous);
        }
    }

    /// Runs `action` after the next backoff delay, replacing any action still pending.
    ///
    /// Returns the chosen delay. Must be called from within a tokio runtime.
    pub fn run_after_delay<F, Fut>(&self, action: F) -> Duration
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay_before_next_attempt();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action().await;
        });

        if let Some(previous) = self.pending.lock().replace(handle) {
            previous.abort();
        }

        tracing::debug!("Retry scheduled in {:?}", delay);
        delay
    }

    /// Whether a delayed action is scheduled and has not completed.
    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancels the pending action, if any. The attempt counter is kept.
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }

    /// Cancels the pending action and clears the attempt counter.
    pub fn reset(&self) {
        self.cancel();
        self.attempts.store(0, Ordering::SeqCst);
    }
}

impl Drop for Throttler {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}
