//! Retry policy with capped exponential backoff.
//!
//! Delays are deterministic: there is no jitter. Many projects retrying
//! against the same render service will therefore retry in lockstep.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Message fragments that mark an error as transient.
pub const DEFAULT_RETRYABLE_KEYWORDS: [&str; 6] = [
    "timeout",
    "network",
    "connection",
    "temporary",
    "rate limit",
    "service unavailable",
];

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Lower-case message fragments that make an error retryable.
    #[serde(default = "default_retryable_keywords")]
    pub retryable_keywords: Vec<String>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retryable_keywords() -> Vec<String> {
    DEFAULT_RETRYABLE_KEYWORDS.iter().map(|k| (*k).to_string()).collect()
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            retryable_keywords: default_retryable_keywords(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay_ms(mut self, delay: u64) -> Self {
        self.initial_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Replaces the retryable keyword set.
    #[must_use]
    pub fn with_retryable_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Attempts actually made; a zero setting still runs the operation once.
    #[must_use]
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Returns the delay to wait after failed attempt `attempt` (1-based).
    ///
    /// `min(initial_delay_ms * backoff_multiplier^(attempt-1), max_delay_ms)`.
    /// Returns `None` for attempt 0 and once `attempt` reaches the maximum,
    /// since no retry follows the final attempt.
    #[must_use]
    pub fn compute_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.effective_max_attempts() {
            return None;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Some(Duration::from_millis(capped.max(0.0) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 10_000);
        assert_eq!(policy.retryable_keywords.len(), 6);
    }

    #[test]
    fn test_retry_policy_builder() {
        let policy = RetryPolicy::new()
            .with_max_attempts(5)
            .with_initial_delay_ms(500)
            .with_max_delay_ms(4000)
            .with_backoff_multiplier(3.0)
            .with_retryable_keywords(["flaky"]);

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay_ms, 500);
        assert_eq!(policy.max_delay_ms, 4000);
        assert_eq!(policy.retryable_keywords, vec!["flaky".to_string()]);
    }

    #[test]
    fn test_compute_delay_exponential() {
        let policy = RetryPolicy::new()
            .with_max_attempts(5)
            .with_initial_delay_ms(100)
            .with_max_delay_ms(10_000);

        assert_eq!(policy.compute_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.compute_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.compute_delay(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.compute_delay(4), Some(Duration::from_millis(800)));
    }

    #[test]
    fn test_compute_delay_capped_and_non_decreasing() {
        let policy = RetryPolicy::new()
            .with_max_attempts(20)
            .with_initial_delay_ms(1000)
            .with_max_delay_ms(5000);

        let delays: Vec<_> = (1..20).filter_map(|a| policy.compute_delay(a)).collect();
        assert_eq!(delays.len(), 19);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_millis(5000));
    }

    #[test]
    fn test_compute_delay_absent_at_max_attempts() {
        let policy = RetryPolicy::new().with_max_attempts(3);
        assert!(policy.compute_delay(0).is_none());
        assert!(policy.compute_delay(2).is_some());
        assert!(policy.compute_delay(3).is_none());
        assert!(policy.compute_delay(4).is_none());
    }

    #[test]
    fn test_zero_max_attempts_runs_once() {
        let policy = RetryPolicy::new().with_max_attempts(0);
        assert_eq!(policy.effective_max_attempts(), 1);
        assert!(policy.compute_delay(1).is_none());
    }

    #[test]
    fn test_policy_deserialize_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 4}"#).unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_delay_ms, 1000);
        assert!(policy.retryable_keywords.contains(&"rate limit".to_string()));
    }
}
