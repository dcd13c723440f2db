//! Exponential-backoff retry policy.

use chrono::TimeDelta;

use chronos_config::RetryConfig;

/// Upper bound on a single backoff delay.
const MAX_BACKOFF_SECS: u64 = 30 * 24 * 60 * 60;

/// What to do with a job after an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule after `delay`; this will be retry number `attempt`.
    Retry { attempt: u32, delay: TimeDelta },
    /// Retries are exhausted; the job becomes FAILED.
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_base: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.backoff_base)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: u64) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide the outcome for a job whose failure count is now `failures`
    /// (already incremented for the failure being handled).
    pub fn decide(&self, failures: u32) -> RetryDecision {
        if failures >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            attempt: failures,
            delay: self.backoff(failures),
        }
    }

    /// `backoff_base ^ failures` seconds, capped at thirty days.
    pub fn backoff(&self, failures: u32) -> TimeDelta {
        let secs = self.backoff_base.saturating_pow(failures).min(MAX_BACKOFF_SECS);
        TimeDelta::seconds(secs as i64)
    }
}
