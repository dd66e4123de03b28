//! Commit-conflict retry policy: capped exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// How the dispatcher reruns an operation whose commit conflicted.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Relative jitter in `[0, 1]`; `0.5` spreads each delay over ±50 %.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `retries_done` retries.
    #[must_use]
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    /// Backoff before retry number `retry` (zero-based).
    #[must_use]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        let nominal = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let scale = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        nominal.mul_f64(scale).min(self.max_delay)
    }
}
