//! Retry eligibility and backoff delays.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorClass;

/// Retry policy shared by the connection manager and the queue adapter.
///
/// Delays grow exponentially: `base_delay * 2^attempt` with `attempt`
/// counting from 0, capped at `max_delay`. No jitter is applied; retry
/// volumes here are small enough that synchronized retries are not a
/// concern yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts after the first failure (0 = never retry).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy for initial/renewed database connects.
    pub fn connect() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Policy for individual queries after a reconnect.
    pub fn query() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Whether another attempt is allowed for a failure of the given class.
    ///
    /// Only transient failures are ever retried; `attempt` is 0-indexed.
    pub fn should_retry(&self, attempt: u32, class: ErrorClass) -> bool {
        class == ErrorClass::Transient && attempt < self.max_attempts
    }

    /// Delay before retrying after the given attempt: `base * 2^attempt`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let factor = 2_u64.saturating_pow(attempt.min(32));
        let delay_ms = base_ms
            .saturating_mul(factor)
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        };

        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(8),
        };

        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(9), Duration::from_secs(8));
    }

    #[test]
    fn transient_retried_until_budget_spent() {
        let policy = RetryPolicy::connect();

        assert!(policy.should_retry(0, ErrorClass::Transient));
        assert!(policy.should_retry(1, ErrorClass::Transient));
        assert!(policy.should_retry(2, ErrorClass::Transient));
        assert!(!policy.should_retry(3, ErrorClass::Transient));
    }

    #[test]
    fn permanent_never_retried() {
        let policy = RetryPolicy::connect();

        assert!(!policy.should_retry(0, ErrorClass::Permanent));
        assert!(!policy.should_retry(1, ErrorClass::Permanent));
    }

    #[test]
    fn no_retry_policy_rejects_first_retry() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(0, ErrorClass::Transient));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: delays are monotonically non-decreasing in the attempt
        /// number and equal `base * 2^n` below the cap.
        #[test]
        fn delay_monotonic_and_exponential(
            base_ms in 1u64..5_000,
            attempt in 0u32..8,
        ) {
            let policy = RetryPolicy {
                max_attempts: 10,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_secs(3_600),
            };

            let current = policy.delay_for(attempt);
            let next = policy.delay_for(attempt + 1);
            prop_assert!(next >= current);

            let expected = base_ms * 2u64.pow(attempt);
            if expected <= policy.max_delay.as_millis() as u64 {
                prop_assert_eq!(current, Duration::from_millis(expected));
            }
        }

        /// Property: permanent failures are never retried, at any attempt.
        #[test]
        fn permanent_never_retried_any_attempt(attempt in 0u32..100) {
            let policy = RetryPolicy::default();
            prop_assert!(!policy.should_retry(attempt, ErrorClass::Permanent));
        }

        /// Property: transient failures retry exactly while attempts remain.
        #[test]
        fn transient_retry_matches_budget(
            attempt in 0u32..100,
            max_attempts in 0u32..50,
        ) {
            let policy = RetryPolicy::default().with_max_attempts(max_attempts);
            prop_assert_eq!(
                policy.should_retry(attempt, ErrorClass::Transient),
                attempt < max_attempts
            );
        }
    }
}
