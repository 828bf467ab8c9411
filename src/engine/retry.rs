//! Bounded retry with exponential backoff.
//!
//! Every failed attempt is treated as transient: processor errors,
//! unsuccessful results, timeouts and panics all consume one attempt.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::engine::{RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default(); // 2 attempts, 2s base
//! assert_eq!(
//!     policy.should_retry(1),
//!     RetryDecision::Retry { delay: Duration::from_secs(2), attempt: 2 }
//! );
//! assert!(matches!(policy.should_retry(2), RetryDecision::DoNotRetry { .. }));
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

/// Default attempts per link, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default delay before the second attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default multiplier applied per further attempt.
const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;

/// Cap on a single backoff sleep.
const MAX_DELAY: Duration = Duration::from_secs(300);

/// Whether to make another attempt after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep `delay`, then make attempt number `attempt`.
    Retry {
        /// How long to wait first.
        delay: Duration,
        /// 1-indexed number of the next attempt.
        attempt: u32,
    },

    /// Give up; the last failure is final.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Attempt cap and backoff schedule.
///
/// Delay before attempt `n + 1` after attempt `n` failed:
///
/// ```text
/// delay = min(base_delay * multiplier^(n - 1), 300s) + jitter
/// ```
///
/// With defaults: one retry after 2s. With `max_attempts = 4`: 2s, 4s, 8s.
/// No sleep follows the final attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    backoff_multiplier: u32,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Creates a doubling policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Adds up to `max_jitter` of random delay to each backoff.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Maximum attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay before the second attempt.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Decides what follows the failure of attempt number `attempt` (1-indexed).
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            debug!(attempt, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.backoff_delay(attempt) + self.jitter();
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Un-jittered backoff after attempt `attempt` failed.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self
            .backoff_multiplier
            .checked_pow(exponent)
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(MAX_DELAY, |delay| delay.min(MAX_DELAY))
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
