//! The pure backoff schedule.
//!
//! `delay(n) = min(base_delay * backoff_factor^n, max_delay)` — a plain
//! function of the attempt number, so the policy is unit-testable without
//! timers. The retry ceiling is a parameter, not a constant: the review
//! flow runs with 10 retries while shorter-lived flows run with 5.

use std::time::Duration;

/// Bounded exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied per retry.
    pub backoff_factor: u32,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
    /// Number of retries after the initial attempt; a fetch cycle makes
    /// at most `max_retries + 1` calls.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    /// The review-retrieval profile: 2s base, doubling, 10s cap, 10 retries.
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(2_000),
            backoff_factor: 2,
            max_delay: Duration::from_millis(10_000),
            max_retries: 10,
        }
    }
}

impl RetryPolicy {
    /// The shorter-lived profile used by secondary flows: 5 retries,
    /// same curve.
    pub fn short() -> Self {
        Self {
            max_retries: 5,
            ..Self::default()
        }
    }

    /// Delay before retry `attempt` (0-indexed), capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = match self.backoff_factor.checked_pow(attempt) {
            Some(factor) => factor,
            // Growth overflowed u32; the cap applies regardless.
            None => return self.max_delay,
        };
        let scaled = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        scaled.min(self.max_delay)
    }

    /// Total calls a full cycle makes before giving up.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}
