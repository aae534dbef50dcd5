//! Retry policy and capped exponential backoff.
//!
//! A policy names the total attempt budget, the backoff base/cap, and a
//! predicate deciding which node errors are worth retrying. Jitter draws
//! from the worker's own RNG (seeded per worker from the run seed, see
//! [`crate::ordering::worker_seed`]), so backoff sequences are reproducible
//! for a given run id and never shared across threads.

use rand::Rng;
use rand::rngs::StdRng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::node::NodeError;

/// Predicate deciding whether an error is retryable.
pub type RetryPredicate = Arc<dyn Fn(&NodeError) -> bool + Send + Sync>;

/// Per-node retry policy: attempt budget, backoff shape, and predicate.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1).
    pub max_attempts: u32,
    /// Backoff base delay for the first retry.
    pub base: Duration,
    /// Upper bound on any single backoff delay.
    pub max: Duration,
    predicate: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base", &self.base)
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Retry transient errors (timeouts, rate limits, upstream 5xx) up to
    /// `max_attempts` total attempts.
    #[must_use]
    pub fn transient(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            max,
            predicate: Arc::new(NodeError::is_transient),
        }
    }

    /// Never retry.
    #[must_use]
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            base: Duration::ZERO,
            max: Duration::ZERO,
            predicate: Arc::new(|_| false),
        }
    }

    /// Replace the retry predicate.
    #[must_use]
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&NodeError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Whether the policy's predicate accepts this error.
    #[must_use]
    pub fn should_retry(&self, error: &NodeError) -> bool {
        (self.predicate)(error)
    }

    /// Backoff before retrying after the given zero-based failed attempt:
    /// `min(base * 2^attempt, max)` scaled by jitter in `[0.5, 1.0)`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32, rng: &mut StdRng) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let exp = attempt.min(32);
        let raw_ms = base_ms.saturating_mul(1u64.checked_shl(exp).unwrap_or(u64::MAX));
        let capped_ms = raw_ms.min(self.max.as_millis() as u64);
        let jitter: f64 = 0.5 + rng.random::<f64>() * 0.5;
        Duration::from_millis((capped_ms as f64 * jitter) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::never()
    }
}
