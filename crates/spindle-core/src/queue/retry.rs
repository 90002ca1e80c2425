//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Retry policy for failed tasks.
///
/// Exponential backoff: `delay = base_delay * multiplier^retry_count`,
/// capped at `max_delay`. With the default multiplier of 2 this is the
/// classic `2^retry_count` time units, where `base_delay` is the unit.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// One backoff "time unit".
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: 2.0,
            max_delay,
        }
    }

    /// Delay before re-queueing a task.
    ///
    /// # Arguments
    /// * `retry_count` - retries consumed so far, including the one being
    ///   scheduled (so the first retry passes 1).
    ///
    /// Example with base_delay=1s, multiplier=2.0:
    /// - retry 1: 2s
    /// - retry 2: 4s
    /// - retry 3: 8s
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300))
    }
}
