//! # Retry policy for camera supervisory loops.
//!
//! [`RetryPolicy`] controls how a camera's loop reacts to failed attempts.
//! It is parameterized by:
//! - [`RetryPolicy::base_delay`] the delay unit;
//! - [`RetryPolicy::max_delay`] the cap;
//! - [`RetryPolicy::max_retries`] the budget before the camera is declared failed;
//! - [`RetryPolicy::cooldown`] the pause before a fresh budget is granted.
//!
//! The delay before retry `n` (1-based) is `base_delay × n`, clamped to `max_delay`.
//! Growth is **linear**: flaky networks recover on a human timescale and the cap
//! is reached within a handful of attempts anyway.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use relayvisor::RetryPolicy;
//!
//! let policy = RetryPolicy {
//!     base_delay: Duration::from_secs(5),
//!     ..RetryPolicy::default()
//! };
//!
//! assert_eq!(policy.delay_for(1), Duration::from_secs(5));
//! assert_eq!(policy.delay_for(3), Duration::from_secs(15));
//! // 5s × 10 = 50s → capped at max=30s
//! assert_eq!(policy.delay_for(10), Duration::from_secs(30));
//! ```

use std::time::Duration;

/// Linear backoff with a bounded budget and a cooldown-and-reset cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts tolerated before the camera is declared failed.
    pub max_retries: u32,
    /// Delay unit multiplied by the retry counter.
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Pause after the budget is exhausted, before the counter is reset.
    pub cooldown: Duration,
    /// Uptime after which a connection forgives prior failures.
    pub healthy_after: Duration,
}

impl Default for RetryPolicy {
    /// Returns a policy with:
    /// - `max_retries = 3`;
    /// - `base_delay = 5s`, `max_delay = 30s`;
    /// - `cooldown = 30s`, `healthy_after = 60s`.
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            cooldown: Duration::from_secs(30),
            healthy_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Computes the delay before retry number `retry` (1-based).
    ///
    /// `retry = 0` yields `base_delay` (used for reconnects after a clean exit).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay.min(self.max_delay);
        if retry <= 1 {
            return base;
        }
        self.base_delay
            .checked_mul(retry)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Returns `true` once the counter has gone past the budget.
    #[inline]
    pub fn is_exhausted(&self, retry: u32) -> bool {
        retry > self.max_retries
    }

    /// Returns `true` if a connection that lasted `uptime` forgives prior failures.
    #[inline]
    pub fn is_healthy_run(&self, uptime: Duration) -> bool {
        uptime >= self.healthy_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_linear_growth() {
        let p = policy(5_000, 30_000);
        assert_eq!(p.delay_for(1), Duration::from_secs(5));
        assert_eq!(p.delay_for(2), Duration::from_secs(10));
        assert_eq!(p.delay_for(3), Duration::from_secs(15));
        assert_eq!(p.delay_for(6), Duration::from_secs(30));
        assert_eq!(p.delay_for(7), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_retry_uses_base() {
        let p = policy(5_000, 30_000);
        assert_eq!(p.delay_for(0), Duration::from_secs(5));
    }

    #[test]
    fn test_base_exceeds_max() {
        let p = policy(45_000, 30_000);
        assert_eq!(p.delay_for(1), Duration::from_secs(30));
        assert_eq!(p.delay_for(4), Duration::from_secs(30));
    }

    #[test]
    fn test_overflow_clamps_to_max() {
        let p = RetryPolicy {
            base_delay: Duration::from_secs(u64::MAX / 2),
            max_delay: Duration::from_secs(30),
            ..RetryPolicy::default()
        };
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_budget_exceeded_after_max() {
        let p = RetryPolicy::default();
        assert!(!p.is_exhausted(3));
        assert!(p.is_exhausted(4));
    }
}
