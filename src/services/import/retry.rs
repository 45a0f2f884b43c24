//! Page retry policy
//!
//! Exponential backoff (`base * 2^attempt`, capped) with optional jitter of up
//! to 25% on top.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::ImportError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Total attempts per page, the first one included
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_backoff_ms: config.base_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            max_attempts: config.max_attempts.max(1),
            jitter: config.jitter,
        }
    }

    /// No waiting between attempts (tests, one-shot tools)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            base_backoff_ms: 0,
            max_backoff_ms: 0,
            max_attempts: max_attempts.max(1),
            jitter: false,
        }
    }

    pub fn compute_backoff_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.min(30);
        let delay = self.base_backoff_ms.saturating_mul(1u64 << exp);
        delay.min(self.max_backoff_ms)
    }

    /// Delay before retrying after the `failures`-th failed attempt (1-based),
    /// or `None` when the error is terminal or the budget is spent.
    pub fn next_delay(&self, failures: u32, error: &ImportError) -> Option<Duration> {
        if !error.is_retryable() || failures >= self.max_attempts {
            return None;
        }

        let mut delay_ms = self.compute_backoff_ms(failures.saturating_sub(1));
        if self.jitter && delay_ms > 0 {
            let extra = rand::thread_rng().gen_range(0..=delay_ms / 4);
            delay_ms = (delay_ms + extra).min(self.max_backoff_ms);
        }
        Some(Duration::from_millis(delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_backoff_ms: 100,
            max_backoff_ms: 1_000,
            max_attempts: 4,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_and_capped() {
        let p = policy();
        assert_eq!(p.compute_backoff_ms(0), 100);
        assert_eq!(p.compute_backoff_ms(2), 400);
        assert_eq!(p.compute_backoff_ms(10), 1_000);
    }

    #[test]
    fn test_budget_is_total_attempts() {
        let p = policy();
        let err = ImportError::transient("timeout");
        assert_eq!(p.next_delay(1, &err), Some(Duration::from_millis(100)));
        assert_eq!(p.next_delay(3, &err), Some(Duration::from_millis(400)));
        assert_eq!(p.next_delay(4, &err), None);
    }

    #[test]
    fn test_terminal_errors_are_not_retried() {
        assert_eq!(policy().next_delay(1, &ImportError::permanent("revoked")), None);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let p = RetryPolicy { jitter: true, ..policy() };
        let err = ImportError::Lookup("down".into());
        for _ in 0..50 {
            let delay = p.next_delay(2, &err).unwrap().as_millis() as u64;
            assert!((200..=250).contains(&delay), "delay {delay}");
        }
    }
}
