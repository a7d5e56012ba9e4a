//! Retry policy: per-job delays between attempts and the attempt budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Delay used for any attempt the configured delay list does not cover.
pub const FALLBACK_DELAY: Duration = Duration::from_secs(60);

/// Backoff strategy used to derive a delay list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(n-1)
    #[default]
    Exponential,
    /// Linear backoff: base * n
    Linear,
}

/// How strictly the retry engine treats failures to persist attempt counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttemptBookkeeping {
    /// Log the failure and let the attempt proceed.
    #[default]
    BestEffort,
    /// Treat the failure as terminal for the task.
    Required,
}

impl core::str::FromStr for BackoffStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            "linear" => Ok(Self::Linear),
            other => Err(DomainError::validation(format!(
                "backoff must be fixed, exponential or linear, got {other}"
            ))),
        }
    }
}

impl core::str::FromStr for AttemptBookkeeping {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best_effort" | "best-effort" => Ok(Self::BestEffort),
            "required" => Ok(Self::Required),
            other => Err(DomainError::validation(format!(
                "attempt bookkeeping must be best_effort or required, got {other}"
            ))),
        }
    }
}

/// Retry policy for every task of one job.
///
/// `delays[0]` is the wait before attempt 2; attempt 1 never waits. Loaded once per
/// orchestration run and treated as immutable for that run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(with = "duration_millis", rename = "delays_ms")]
    pub delays: Vec<Duration>,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    /// Short first delay, escalating to a one-minute cap, seven attempts in total.
    fn default() -> Self {
        Self {
            delays: [5, 15, 30, 60, 60, 60]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            max_attempts: 7,
        }
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>, max_attempts: u32) -> DomainResult<Self> {
        if max_attempts == 0 {
            return Err(DomainError::validation("max_attempts must be at least 1"));
        }
        Ok(Self {
            delays,
            max_attempts,
        })
    }

    pub fn from_millis(delays_ms: &[u64], max_attempts: u32) -> DomainResult<Self> {
        Self::new(
            delays_ms.iter().copied().map(Duration::from_millis).collect(),
            max_attempts,
        )
    }

    /// Policy that retries without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            delays: vec![Duration::ZERO; max_attempts.saturating_sub(1) as usize],
            max_attempts: max_attempts.max(1),
        }
    }

    /// Derive the delay list from a backoff strategy, capped at `max_delay`.
    pub fn with_backoff(
        strategy: BackoffStrategy,
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        let base_ms = base_delay.as_millis() as f64;
        let max_ms = max_delay.as_millis() as f64;

        let delays = (1..max_attempts.max(1))
            .map(|n| {
                let delay_ms = match strategy {
                    BackoffStrategy::Fixed => base_ms,
                    BackoffStrategy::Exponential => base_ms * 2_f64.powi((n - 1) as i32),
                    BackoffStrategy::Linear => base_ms * n as f64,
                };
                Duration::from_millis(delay_ms.min(max_ms).max(0.0) as u64)
            })
            .collect();

        Self {
            delays,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Wait before `attempt` (1-indexed).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.delays
            .get((attempt - 2) as usize)
            .copied()
            .unwrap_or(FALLBACK_DELAY)
    }

    pub fn is_last_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    pub fn delays_ms(&self) -> Vec<u64> {
        self.delays.iter().map(|d| d.as_millis() as u64).collect()
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(delays: &[Duration], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(delays.iter().map(|d| d.as_millis() as u64))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Duration>, D::Error> {
        let ms = Vec::<u64>::deserialize(d)?;
        Ok(ms.into_iter().map(Duration::from_millis).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_attempt_never_waits() {
        assert_eq!(RetryPolicy::default().delay_before(1), Duration::ZERO);
    }

    #[test]
    fn default_policy_escalates_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.delay_before(2), Duration::from_secs(5));
        assert_eq!(policy.delay_before(7), Duration::from_secs(60));
    }

    #[test]
    fn missing_entries_fall_back() {
        let policy = RetryPolicy::from_millis(&[10], 4).unwrap();
        assert_eq!(policy.delay_before(2), Duration::from_millis(10));
        assert_eq!(policy.delay_before(3), FALLBACK_DELAY);
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::with_backoff(
            BackoffStrategy::Exponential,
            6,
            Duration::from_millis(100),
            Duration::from_millis(500),
        );
        assert_eq!(policy.delays_ms(), vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let policy = RetryPolicy::with_backoff(
            BackoffStrategy::Linear,
            4,
            Duration::from_millis(100),
            Duration::from_secs(10),
        );
        assert_eq!(policy.delays_ms(), vec![100, 200, 300]);
    }

    #[test]
    fn fixed_backoff_repeats_base_delay() {
        let policy = RetryPolicy::with_backoff(
            BackoffStrategy::Fixed,
            3,
            Duration::from_millis(750),
            Duration::from_secs(10),
        );
        assert_eq!(policy.delays_ms(), vec![750, 750]);
    }

    #[test]
    fn bookkeeping_parses_config_values() {
        assert_eq!(
            "best_effort".parse::<AttemptBookkeeping>().unwrap(),
            AttemptBookkeeping::BestEffort
        );
        assert_eq!(
            "Required".parse::<AttemptBookkeeping>().unwrap(),
            AttemptBookkeeping::Required
        );
        assert!("sometimes".parse::<AttemptBookkeeping>().is_err());
    }

    #[test]
    fn backoff_parses_config_values() {
        assert_eq!(
            " Linear ".parse::<BackoffStrategy>().unwrap(),
            BackoffStrategy::Linear
        );
        assert_eq!(
            "fixed".parse::<BackoffStrategy>().unwrap(),
            BackoffStrategy::Fixed
        );
        assert!("random".parse::<BackoffStrategy>().is_err());
    }

    #[test]
    fn zero_attempts_is_invalid() {
        assert!(RetryPolicy::new(vec![], 0).is_err());
    }

    #[test]
    fn serializes_delays_as_millis() {
        let policy = RetryPolicy::from_millis(&[0, 250], 3).unwrap();
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["delays_ms"], serde_json::json!([0, 250]));
        let back: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }

    proptest! {
        #[test]
        fn delay_lookup_uses_previous_slot(
            delays in prop::collection::vec(0u64..10_000, 0..8),
            attempt in 2u32..12,
        ) {
            let policy = RetryPolicy::from_millis(&delays, 12).unwrap();
            let expected = delays
                .get((attempt - 2) as usize)
                .map(|ms| Duration::from_millis(*ms))
                .unwrap_or(FALLBACK_DELAY);
            prop_assert_eq!(policy.delay_before(attempt), expected);
        }
    }
}
