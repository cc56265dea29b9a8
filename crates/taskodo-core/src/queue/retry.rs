//! Retry policy: decides how long to wait before re-notifying workers when a
//! dequeue finds nothing runnable.

use std::time::Duration;

use crate::config::SchedulerConfig;

/// Floor for any retry delay.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Delay policy for the deferred-retry timer.
///
/// The streak counts consecutive arms with no task handed out in between.
/// It resets whenever work is submitted, handed out or completed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier. 1.0 keeps the delay fixed.
    pub multiplier: f64,

    /// Cap on the computed delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Fixed delay, no backoff.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            base_delay: config.retry_delay(),
            multiplier: config.retry_backoff,
            max_delay: config.max_retry_delay(),
        }
    }

    /// Delay for the `streak`-th consecutive retry (1-indexed).
    ///
    /// delay = base_delay * multiplier^(streak - 1), capped at `max_delay`.
    /// The result is at least [`MIN_RETRY_DELAY`]. A multiplier below 1.0 (or
    /// NaN) counts as 1.0.
    pub fn next_delay(&self, streak: u32) -> Duration {
        let base = self.base_delay.max(MIN_RETRY_DELAY);
        let max = self.max_delay.max(base);
        let multiplier = if self.multiplier >= 1.0 { self.multiplier } else { 1.0 };

        let exponent = streak.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = base.as_secs_f64() * multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= max.as_secs_f64() {
            return max;
        }
        Duration::from_secs_f64(delay_secs).max(base)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}
