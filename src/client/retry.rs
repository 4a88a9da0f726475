//! Backoff curves for failed completions.

use crate::models::{CompletionError, RetryKind};
use rand::Rng;
use std::time::Duration;

/// How long to wait between completion attempts.
///
/// Transient failures wait a constant interval. Rate limits wait a random
/// duration drawn uniformly from `[0, min(cap, multiplier * 2^attempt)]`,
/// or the provider's `retry-after` hint when one was sent. Permanent
/// failures are never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub transient_interval: Duration,
    pub rate_limit_multiplier: f64,
    pub rate_limit_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            transient_interval: Duration::from_secs(3),
            rate_limit_multiplier: 1.5,
            rate_limit_cap: Duration::from_secs(100),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Retry immediately. Used by tests against local mock servers.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            transient_interval: Duration::ZERO,
            rate_limit_multiplier: 0.0,
            rate_limit_cap: Duration::ZERO,
        }
    }

    /// Upper bound of the rate-limit wait after `attempt` failures (0-based).
    pub fn rate_limit_ceiling(&self, attempt: u32) -> Duration {
        let secs = self.rate_limit_multiplier * 2f64.powi(attempt.min(30) as i32);
        Duration::from_secs_f64(secs.min(self.rate_limit_cap.as_secs_f64()).max(0.0))
    }

    /// Delay before the next attempt, or `None` to give up.
    pub fn delay_for(&self, error: &CompletionError, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }
        match error.kind() {
            RetryKind::Permanent => None,
            RetryKind::Transient => Some(self.transient_interval),
            RetryKind::RateLimited => {
                if let Some(secs) = error.retry_after().filter(|s| *s >= 0.0) {
                    // Hints too large for a Duration wait the full cap.
                    let hint = Duration::try_from_secs_f64(secs).unwrap_or(self.rate_limit_cap);
                    return Some(hint.min(self.rate_limit_cap));
                }
                let ceiling = self.rate_limit_ceiling(attempt);
                let secs = rand::thread_rng().gen_range(0.0..=ceiling.as_secs_f64());
                Some(Duration::from_secs_f64(secs))
            }
        }
    }
}
