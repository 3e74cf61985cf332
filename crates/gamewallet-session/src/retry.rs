//! Linear backoff schedule shared by profile lookups and session restore.

use gamewallet_core::RetryConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempt `k` (1-based) waits `(k - 1) * base_delay` before running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// One initial lookup plus three retries at 1s, 2s, 3s.
    pub fn profile_default() -> Self {
        Self::new(4, Duration::from_secs(1))
    }

    /// Three reconnect attempts at 0s, 1s, 2s.
    pub fn restore_default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }

    /// Delay to wait before `attempt` (1-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.saturating_sub(1)
    }

    /// Attempt numbers in order.
    pub fn attempts(&self) -> impl Iterator<Item = u32> {
        1..=self.max_attempts
    }

    /// Sleep for the backoff before `attempt`. Returns false if cancelled.
    pub async fn wait_before(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        let delay = self.delay_before(attempt);
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay())
    }
}
