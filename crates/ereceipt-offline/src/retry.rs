//! # Retry Policy
//!
//! Exponential backoff for operations that failed with a retryable error.
//!
//! ```text
//! retry_count  delay (base 1s, ×2, cap 30s)
//! ───────────  ─────
//!      0        1s
//!      1        2s
//!      2        4s
//!      3        8s
//!      4       16s
//!      5+      30s
//! ```
//!
//! Built on `backoff::ExponentialBackoff` with jitter disabled so delays are
//! exact and tests can advance virtual time to them.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;

use crate::config::SyncSettings;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        RetryPolicy {
            base_delay: Duration::from_millis(settings.base_retry_delay_ms),
            multiplier: settings.backoff_multiplier,
            max_delay: Duration::from_millis(settings.max_retry_delay_ms),
        }
    }

    /// Delay before retrying an operation that has been retried
    /// `retry_count` times so far.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let mut backoff = self.backoff();
        let mut delay = self.base_delay;
        for _ in 0..=retry_count {
            match backoff.next_backoff() {
                Some(next) => delay = next,
                None => break,
            }
            if delay >= self.max_delay {
                break;
            }
        }
        // Whole milliseconds; the crate's interval math can add a nanosecond
        Duration::from_millis(delay.as_millis() as u64).min(self.max_delay)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}
