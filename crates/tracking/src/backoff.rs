//! Backoff policy for delivery retries.
//!
//! Encoded as a small pure struct so the curve is testable on its own.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff curve: `base * factor^(attempt-1)`, capped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Growth factor per attempt.
    pub factor: f64,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Total attempts allowed before dead-lettering.
    pub max_attempts: u32,
    /// Jitter fraction (0.0-1.0) spread deterministically over attempts.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::delivery()
    }
}

impl BackoffPolicy {
    /// Curve used for webhook delivery: 5s base, doubling, capped at 5m,
    /// five attempts.
    pub fn delivery() -> Self {
        Self {
            base: Duration::from_secs(5),
            factor: 2.0,
            cap: Duration::from_secs(5 * 60),
            max_attempts: 5,
            jitter: 0.0,
        }
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base.as_millis() as f64;
        let cap_ms = self.cap.as_millis() as f64;
        let delay_ms = (base_ms * self.factor.powi((attempt - 1) as i32)).min(cap_ms);

        // Deterministic jitter keyed on the attempt number; enough to spread
        // concurrent retries without dragging in a PRNG.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
