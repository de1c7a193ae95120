//! Retry decisions with exponential backoff for transient stage failures.
//!
//! The [`RetryPolicy`] is pure: it looks at a [`StageOutcome`] and the number
//! of failed attempts so far and returns a [`RetryDecision`]. Waiting is done
//! by the caller through a [`Timer`], so tests can replace real sleeping.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use recipe_pipeline_core::record::ErrorKind;
//! use recipe_pipeline_core::retry::{RetryDecision, RetryPolicy};
//! use recipe_pipeline_core::stage::{FailureInfo, StageOutcome};
//!
//! let policy = RetryPolicy::with_max_retries(3).with_jitter(Duration::ZERO);
//! let outcome = StageOutcome::TransientFailure(FailureInfo::new(ErrorKind::Timeout, "slow"));
//!
//! assert_eq!(
//!     policy.decide(1, &outcome),
//!     RetryDecision::RetryAfter { delay: Duration::from_secs(1) }
//! );
//! assert!(matches!(policy.decide(3, &outcome), RetryDecision::GiveUp { .. }));
//! ```

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, instrument};

use crate::stage::StageOutcome;

/// Default number of attempts per stage, including the first one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Default maximum jitter added to delays (500ms).
pub const DEFAULT_JITTER: Duration = Duration::from_millis(500);

/// Default largest server-mandated delay honored (1 hour).
pub const DEFAULT_MAX_SERVER_DELAY: Duration = Duration::from_secs(3600);

/// What to do after a stage outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// The stage succeeded; move on to the next one.
    Proceed,

    /// Run the same stage again after `delay`.
    RetryAfter {
        /// How long to wait before the next attempt.
        delay: Duration,
    },

    /// Stop trying; the record becomes `Failed`.
    GiveUp {
        /// Human-readable reason.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempts - 1) + jitter, max_delay)
/// ```
///
/// A `Retry-After` value reported by the backend replaces the computed delay
/// and is bounded by `max_server_delay` instead of `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per stage, including the first one.
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    /// Upper bound of the random jitter; zero disables it.
    jitter: Duration,
    max_server_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_JITTER,
            max_server_delay: DEFAULT_MAX_SERVER_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings.
    ///
    /// `max_retries` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter: DEFAULT_JITTER,
            max_server_delay: DEFAULT_MAX_SERVER_DELAY,
        }
    }

    /// Creates a policy with a custom attempt limit and default delays.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
            ..Self::default()
        }
    }

    /// Replaces the jitter bound.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the bound on server-mandated delays.
    #[must_use]
    pub fn with_max_server_delay(mut self, max_server_delay: Duration) -> Self {
        self.max_server_delay = max_server_delay;
        self
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decides what follows a stage outcome.
    ///
    /// `attempts` is the failed-attempt count including this failure.
    #[instrument(level = "debug", skip(self, outcome), fields(max_retries = self.max_retries))]
    pub fn decide(&self, attempts: u32, outcome: &StageOutcome) -> RetryDecision {
        let info = match outcome {
            StageOutcome::Success => return RetryDecision::Proceed,
            StageOutcome::PermanentFailure(info) => {
                return RetryDecision::GiveUp {
                    reason: format!("permanent {} failure - retry would not help", info.kind),
                };
            }
            StageOutcome::TransientFailure(info) => info,
        };

        if attempts >= self.max_retries {
            debug!(attempts, "max attempts reached");
            return RetryDecision::GiveUp {
                reason: format!("max attempts ({}) exhausted", self.max_retries),
            };
        }

        let delay = match info.retry_after {
            Some(server_delay) => server_delay.min(self.max_server_delay),
            None => self.calculate_delay(attempts),
        };
        debug!(
            attempts,
            delay_ms = delay.as_millis(),
            server_delay = info.retry_after.is_some(),
            "will retry"
        );
        RetryDecision::RetryAfter { delay }
    }

    /// `min(base * multiplier^(attempts-1) + jitter, max)`
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn calculate_delay(&self, attempts: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempts.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        (Duration::from_millis(capped_ms as u64) + self.calculate_jitter()).min(self.max_delay)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let bound = self.jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
    }
}

/// Source of delays for backoff waits.
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Timer`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
