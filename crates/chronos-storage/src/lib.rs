//! chronos-storage: durable job persistence.
//!
//! Defines the [`JobStore`] contract consumed by the scheduler and a
//! SQLite-backed implementation. Every write bumps the job's `version`;
//! writers that race with others go through the conditional operations
//! (`claim`, `save_if_unchanged`) so that at most one writer wins.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chronos_types::{ExecutionLog, Job, JobStatus};

pub use sqlite::SqliteJobStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("Job not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Keyed storage for jobs with status/time range queries.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job. Returns the persisted record.
    async fn save(&self, job: &Job) -> Result<Job>;

    /// Load a job by ID.
    async fn find_by_id(&self, id: &str) -> Result<Option<Job>>;

    /// Load all jobs, oldest first.
    async fn find_all(&self) -> Result<Vec<Job>>;

    /// Load all jobs with the given status.
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;

    /// Jobs in any of `statuses` whose schedule time is strictly before `instant`,
    /// ordered by schedule time.
    async fn find_scheduled_before(
        &self,
        statuses: &[JobStatus],
        instant: DateTime<Utc>,
    ) -> Result<Vec<Job>>;

    /// Jobs in any of `statuses` whose schedule time is at or before `instant`,
    /// ordered by schedule time.
    async fn find_scheduled_until(
        &self,
        statuses: &[JobStatus],
        instant: DateTime<Utc>,
    ) -> Result<Vec<Job>>;

    async fn exists_by_id(&self, id: &str) -> Result<bool>;

    /// Delete a job. Returns whether a record was removed.
    async fn delete_by_id(&self, id: &str) -> Result<bool>;

    /// Atomically move a job from one of `from` to RUNNING under a fresh `run_id`.
    ///
    /// Returns the claimed job only if this call performed the transition;
    /// `None` means the job is gone or another writer changed its status first.
    async fn claim(&self, id: &str, from: &[JobStatus]) -> Result<Option<Job>>;

    /// Replace a job only if nobody wrote it since `job` was loaded, i.e. the
    /// stored `version` still equals `job.version`.
    ///
    /// Returns the persisted record, or `None` when the condition failed.
    async fn save_if_unchanged(&self, job: &Job) -> Result<Option<Job>>;

    /// Atomically append entries to a job's execution history.
    async fn append_logs(&self, id: &str, entries: &[ExecutionLog]) -> Result<()>;
}
