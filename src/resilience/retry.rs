//! Exponential backoff.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Upper bound of the uniform jitter added to each delay
pub const MAX_JITTER_MS: u64 = 1000;

/// Backoff before the retry that follows `attempt`, without jitter.
///
/// `min(base * multiplier^(attempt - 1), max)`. Attempt numbers start at 1;
/// `0` is treated as `1`.
pub fn backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let raw = config.base_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped = if raw.is_finite() {
        raw.min(config.max_delay_ms as f64).max(0.0)
    } else {
        config.max_delay_ms as f64
    };
    Duration::from_millis(capped as u64)
}

/// Retry policy: how many attempts, and how long to wait between them
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from config
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Attempts per load, never less than one
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Whether another attempt may follow `attempt`
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    /// Delay after a failed `attempt`, jittered when configured.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = if self.config.jitter {
            rand::rng().random_range(0..=MAX_JITTER_MS)
        } else {
            0
        };
        self.delay_with_jitter(attempt, jitter_ms)
    }

    /// Delay after a failed `attempt` with an explicit jitter amount.
    pub fn delay_with_jitter(&self, attempt: u32, jitter_ms: u64) -> Duration {
        backoff(attempt, &self.config) + Duration::from_millis(jitter_ms.min(MAX_JITTER_MS))
    }

    /// Backing config
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter: bool) -> RetryConfig {
        RetryConfig {
            jitter,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_backoff_doubles_until_capped() {
        let config = config(false);
        let delays: Vec<u64> = (1..=6)
            .map(|a| backoff(a, &config).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[test]
    fn test_attempt_zero_behaves_like_first() {
        assert_eq!(backoff(0, &config(false)), Duration::from_millis(1000));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        assert_eq!(backoff(u32::MAX, &config(false)), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_stays_within_one_second() {
        let policy = RetryPolicy::new(config(true));
        for _ in 0..50 {
            let delay = policy.delay(2).as_millis() as u64;
            assert!((2000..=3000).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_no_retry_past_max_attempts() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            ..config(false)
        });
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_zero_attempts_normalized_to_one() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 0,
            ..config(false)
        });
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1));
    }
}
