//! Bounded retry with exponential backoff and jitter for provider calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry budget for transient provider failures.
///
/// Total attempts are `max_retries + 1`. The delay before retry `n`
/// (0-based) is `base_delay * factor^n`, capped at `max_delay`, then
/// jittered by +/- 50% when `jitter` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 3_000,
            factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Fixed, jitter-free delays; convenient for tests.
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        let delay_ms = delay.as_millis() as u64;
        Self {
            max_retries,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            factor: 1.0,
            jitter: false,
        }
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let scale = self.factor.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let millis = (self.base_delay_ms as f64 * scale).min(self.max_delay_ms as f64);
        let mut delay = Duration::from_millis(millis.max(0.0) as u64);

        if self.jitter {
            let spread = delay.as_millis() as u64 / 2;
            let offset = fastrand::u64(0..=spread * 2);
            let jittered = (delay.as_millis() as u64 + offset).saturating_sub(spread);
            delay = Duration::from_millis(jittered);
        }

        delay
    }
}
