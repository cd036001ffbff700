//! Retry policy: lease length, retry budget and fixed backoff.

use std::time::Duration;

/// Retry policy of one worker.
///
/// Backoff is fixed (`retry_delay`), not exponential. `retries` counts
/// failures of the current stage, lease expiries included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Restarts allowed after the first attempt.
    pub max_retries: u32,

    /// Delay before a failed task/chunk becomes eligible again.
    pub retry_delay: Duration,

    /// Lease length granted to `map` / `process` / `reduce`.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Whether a record that has now failed `retries` times must be dropped.
    pub fn exhausted(&self, retries: u32) -> bool {
        retries > self.max_retries
    }

    pub fn lease_ms(&self) -> i64 {
        duration_ms(self.timeout)
    }

    pub fn delay_ms(&self) -> i64 {
        duration_ms(self.retry_delay)
    }
}

/// Milliseconds of `d` as a store score, saturating at `i64::MAX`.
pub fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
