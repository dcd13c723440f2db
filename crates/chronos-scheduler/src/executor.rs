//! Pluggable job execution.

use async_trait::async_trait;
use thiserror::Error;

use chronos_types::Job;

/// A failed execution attempt. Handled by the retry policy, never surfaced
/// to callers of `execute`.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct ExecutionFailure {
    pub reason: String,
}

impl ExecutionFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Performs the actual work of a job.
///
/// Every call is a new attempt; implementations own any idempotence their
/// work requires.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn run(&self, job: &Job) -> Result<(), ExecutionFailure>;
}
