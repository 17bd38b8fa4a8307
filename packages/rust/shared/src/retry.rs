//! Retry-with-backoff policy shared by the crawler and the adjudicator.

use std::time::Duration;

/// Exponential backoff policy.
///
/// `max_retries` counts retries, so an operation runs at most
/// `1 + max_retries` times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Same policy with a different retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Total number of attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after the failed attempt `attempt_index` (0-based).
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt_index.min(64) as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let cap = self.max_delay.as_millis() as f64;
        if !millis.is_finite() || millis >= cap {
            return self.max_delay;
        }
        Duration::from_millis(millis as u64)
    }

    /// Whether another attempt is allowed after `attempt_index` failed.
    pub fn should_retry(&self, attempt_index: u32) -> bool {
        attempt_index < self.max_retries
    }
}
