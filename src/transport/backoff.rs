//! Bounded exponential reconnect backoff

use std::time::Duration;

/// `delay = min(2^attempt, max_delay)` seconds, for at most `max_attempts`
/// consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    max_attempts: u32,
    max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(8, Duration::from_secs(60))
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, max_delay: Duration) -> Self {
        Self { max_attempts, max_delay }
    }

    /// Delay before the `attempt`-th consecutive reconnect (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).filter(|secs| *secs <= self.max_delay.as_secs());
        secs.map(Duration::from_secs).unwrap_or(self.max_delay)
    }

    /// True once `attempts` consecutive failures exhaust the policy
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}
