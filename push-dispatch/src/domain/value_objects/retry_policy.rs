//! Delivery retry policy.

use std::time::Duration;

/// How many times a single subscription is tried and how long to wait in between.
///
/// The wait after the n-th failed attempt is `min(base_delay * 2^(n-1), max_delay)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per subscription, including the first one. Never below 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Stretch each wait by up to 25%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Wait before the attempt following failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter {
            delay.mul_f64(1.0 + 0.25 * rand::random::<f64>())
        } else {
            delay
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }

    /// Longest time one subscription can spend backing off, without jitter.
    pub fn max_total_delay(&self) -> Duration {
        let unjittered = Self {
            jitter: false,
            ..self.clone()
        };
        (1..self.max_attempts.max(1))
            .map(|attempt| unjittered.delay_for_attempt(attempt))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_is_one_then_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.max_total_delay(), Duration::from_millis(3000));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = RetryPolicy {
            max_attempts: 10,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(5000));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(5000));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        let single = RetryPolicy::no_retry();
        assert!(!single.should_retry(1));
        assert_eq!(single.max_total_delay(), Duration::ZERO);
    }

    #[test]
    fn test_zero_attempts_still_allows_one() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(!policy.should_retry(1));
        assert_eq!(policy.max_total_delay(), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let policy = RetryPolicy {
            jitter: true,
            ..RetryPolicy::default()
        };
        let delay = policy.delay_for_attempt(2);
        assert!(delay >= Duration::from_millis(2000));
        assert!(delay <= Duration::from_millis(2500));
    }

    #[test]
    fn test_with_backoff() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_millis(5), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(5));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(20));
    }
}
