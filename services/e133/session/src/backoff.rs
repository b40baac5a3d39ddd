//! Retry delay policies for the connector.

use std::time::Duration;

/// Default delay after the first failed attempt
pub const DEFAULT_INITIAL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default upper bound on the retry delay
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Maps a failed-attempt count to the delay before the next attempt
pub trait BackoffPolicy: Send + Sync + std::fmt::Debug {
    /// Delay after `failed_attempts` consecutive failures
    fn backoff_time(&self, failed_attempts: u32) -> Duration;
}

/// `initial * n`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoffPolicy {
    initial: Duration,
    max: Duration,
}

impl LinearBackoffPolicy {
    /// Create a policy
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }
}

impl Default for LinearBackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_RETRY_DELAY, DEFAULT_MAX_RETRY_DELAY)
    }
}

impl BackoffPolicy for LinearBackoffPolicy {
    fn backoff_time(&self, failed_attempts: u32) -> Duration {
        self.initial.saturating_mul(failed_attempts).min(self.max)
    }
}

/// `initial * 2^(n-1)`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoffPolicy {
    initial: Duration,
    max: Duration,
}

impl ExponentialBackoffPolicy {
    /// Create a policy
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }
}

impl BackoffPolicy for ExponentialBackoffPolicy {
    fn backoff_time(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failed_attempts - 1).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}
