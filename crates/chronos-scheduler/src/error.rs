//! Error types for job operations.

use chronos_storage::StorageError;
use thiserror::Error;

/// Errors surfaced to callers of [`crate::JobService`].
///
/// Executor failures never appear here; they are absorbed by the retry policy.
#[derive(Debug, Error)]
pub enum JobError {
    /// Malformed input (blank type, invalid cron expression). Nothing was persisted.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    /// The operation is not allowed in the job's current status.
    #[error("{0}")]
    StateConflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Coarse error category for boundary layers (HTTP status, CLI exit code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorKind {
    Validation,
    NotFound,
    StateConflict,
    Internal,
}

impl JobError {
    pub fn kind(&self) -> JobErrorKind {
        match self {
            JobError::Validation(_) => JobErrorKind::Validation,
            JobError::NotFound(_) => JobErrorKind::NotFound,
            JobError::StateConflict(_) => JobErrorKind::StateConflict,
            JobError::Storage(StorageError::NotFound(_)) => JobErrorKind::NotFound,
            JobError::Storage(_) => JobErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            JobError::Validation("type is required".into()).kind(),
            JobErrorKind::Validation
        );
        assert_eq!(JobError::NotFound("x".into()).kind(), JobErrorKind::NotFound);
        assert_eq!(
            JobError::StateConflict("busy".into()).kind(),
            JobErrorKind::StateConflict
        );
        assert_eq!(
            JobError::from(StorageError::NotFound("x".into())).kind(),
            JobErrorKind::NotFound
        );
    }

    #[test]
    fn test_error_display() {
        let err = JobError::NotFound("job-1".into());
        assert_eq!(err.to_string(), "Job not found: job-1");
        let err = JobError::StateConflict("Job job-1 is not in PAUSED state".into());
        assert_eq!(err.to_string(), "Job job-1 is not in PAUSED state");
    }
}
