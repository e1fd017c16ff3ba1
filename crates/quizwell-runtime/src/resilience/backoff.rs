//! Exponential backoff policy.
//!
//! `delay(attempt) = min(base_delay * backoff_multiplier^attempt, max_delay)`,
//! with `attempt` zero-based. No jitter: the schedule is deterministic.

use backon::BackoffBuilder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::duration_serde;

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "duration_serde")]
    pub base_delay: Duration,

    /// Upper bound for any single delay
    #[serde(with = "duration_serde")]
    pub max_delay: Duration,

    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        if secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Total attempts the policy allows, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Sum of every delay in the schedule.
    pub fn total_delay(&self) -> Duration {
        (0..self.max_retries).map(|a| self.delay(a)).sum()
    }
}

/// Iterator over a policy's delays, consumed by the retry driver.
#[derive(Debug, Clone)]
pub struct PolicyBackoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Iterator for PolicyBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        let delay = self.policy.delay(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}

impl BackoffBuilder for RetryPolicy {
    type Backoff = PolicyBackoff;

    fn build(self) -> Self::Backoff {
        PolicyBackoff {
            policy: self,
            attempt: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(10), Duration::from_secs(10));
    }

    #[test]
    fn test_huge_attempt_saturates_at_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_yields_max_retries_delays() {
        let delays: Vec<_> = RetryPolicy::default().build().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn test_zero_retries_yields_nothing() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(policy.build().count(), 0);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_total_delay() {
        assert_eq!(RetryPolicy::default().total_delay(), Duration::from_secs(7));
    }

    proptest! {
        #[test]
        fn prop_delay_monotonic_and_capped(
            base_ms in 1u64..5_000,
            max_ms in 1u64..60_000,
            multiplier in 1.0f64..4.0,
            attempt in 0u32..64,
        ) {
            let policy = RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                backoff_multiplier: multiplier,
            };
            let current = policy.delay(attempt);
            let next = policy.delay(attempt + 1);
            prop_assert!(current <= next);
            prop_assert!(next <= policy.max_delay);
        }
    }
}
