//! Fixed-delay retry policy shared by job submission and status polling.
//!
//! There is no attempt cap: callers loop until the operation succeeds. The
//! policy only describes how long to wait between attempts.

use std::time::Duration;

use rand::Rng;

/// Default wait between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How long to wait between attempts of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base delay applied after every failed attempt.
    pub delay: Duration,
    /// Upper bound of a uniformly random extra delay. Zero disables jitter.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Constant delay, no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to apply before the next attempt.
    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let bound = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra_ms = rand::rng().random_range(0..=bound);
        self.delay.saturating_add(Duration::from_millis(extra_ms))
    }

    /// Sleep for [`next_delay`](Self::next_delay).
    pub async fn wait(&self) {
        tokio::time::sleep(self.next_delay()).await;
    }
}
