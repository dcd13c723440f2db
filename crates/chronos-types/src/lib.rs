use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ──────────────────── Job Status ────────────────────

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting for its schedule time.
    Pending,
    /// Claimed by a worker; the executor is running.
    Running,
    /// One-time job finished successfully. Terminal.
    Completed,
    /// Retries exhausted (or failed before a manual re-execute).
    Failed,
    /// Cancelled by a user. Terminal.
    Cancelled,
    /// Held by a user until resumed.
    Paused,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Paused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Paused => "PAUSED",
        }
    }

    /// COMPLETED and CANCELLED admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Statuses a job may be claimed from for execution.
    pub fn is_executable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown job status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

// ──────────────────── Execution History ────────────────────

/// Severity of an execution log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// One entry in a job's execution history. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl ExecutionLog {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

// ──────────────────── Job ────────────────────

/// A scheduled unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID, assigned at creation.
    pub id: String,
    /// Free-form kind of work (e.g. "email", "report").
    #[serde(rename = "type")]
    pub job_type: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Instant at which the job next becomes eligible to run.
    pub schedule_time: DateTime<Utc>,
    /// Recurrence rule. Present iff the job is recurring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    /// Consecutive execution failures since the job was created.
    #[serde(default)]
    pub retry_count: u32,
    /// Append-only history, oldest first.
    #[serde(default)]
    pub execution_logs: Vec<ExecutionLog>,
    /// Opaque executor input.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last persisted mutation.
    pub updated_at: DateTime<Utc>,
    /// Incremented by the store on every write; conditional writes compare it.
    #[serde(default)]
    pub version: u64,
    /// Identifier of the most recent claim for execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl Job {
    /// Create a fresh PENDING job with a new id and an empty history.
    pub fn new(job_type: impl Into<String>, schedule_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            status: JobStatus::Pending,
            schedule_time,
            cron_expression: None,
            retry_count: 0,
            execution_logs: Vec::new(),
            parameters: HashMap::new(),
            created_at: now,
            updated_at: now,
            version: 0,
            run_id: None,
        }
    }

    pub fn with_cron_expression(mut self, expr: impl Into<String>) -> Self {
        self.cron_expression = Some(expr.into());
        self
    }

    pub fn with_parameters(mut self, parameters: HashMap<String, serde_json::Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.cron_expression.is_some()
    }

    /// Append a history entry stamped with the current time.
    pub fn push_log(&mut self, message: impl Into<String>) {
        self.execution_logs.push(ExecutionLog::now(message));
    }
}

// ──────────────────── Requests ────────────────────

/// Input for creating or updating a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    /// Job type. Required and non-blank.
    #[serde(rename = "type")]
    pub job_type: String,
    /// When to run; defaults to a short delay from now on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<DateTime<Utc>>,
    /// Recurrence rule (seconds-resolution cron, e.g. "0 */5 * * * *").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl JobRequest {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            ..Default::default()
        }
    }

    pub fn with_schedule_time(mut self, at: DateTime<Utc>) -> Self {
        self.schedule_time = Some(at);
        self
    }

    pub fn with_cron_expression(mut self, expr: impl Into<String>) -> Self {
        self.cron_expression = Some(expr.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// Input for rescheduling a job. Both fields are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RescheduleRequest {
    /// New run time; turns the job into a one-time job unless a new cron is also given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_schedule_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_cron_expression: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
        let parsed: JobStatus = serde_json::from_str("\"PAUSED\"").unwrap();
        assert_eq!(parsed, JobStatus::Paused);
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("running".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert_eq!("FAILED".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!("SCHEDULED".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_and_executable() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());

        assert!(JobStatus::Pending.is_executable());
        assert!(JobStatus::Failed.is_executable());
        assert!(!JobStatus::Running.is_executable());
        assert!(!JobStatus::Paused.is_executable());
    }

    #[test]
    fn test_new_job_defaults() {
        let at = Utc::now();
        let job = Job::new("report", at);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(job.execution_logs.is_empty());
        assert!(!job.is_recurring());
        assert_eq!(job.schedule_time, at);

        let other = Job::new("report", at);
        assert_ne!(job.id, other.id);
    }

    #[test]
    fn test_job_serializes_type_field() {
        let job = Job::new("email", Utc::now()).with_cron_expression("0 * * * * *");
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["type"], "email");
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["cron_expression"], "0 * * * * *");
        assert!(value.get("parameters").is_none());
    }

    #[test]
    fn test_push_log_keeps_order() {
        let mut job = Job::new("generic", Utc::now());
        job.push_log("first");
        job.push_log("second");
        let messages: Vec<_> = job.execution_logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn test_job_request_compat() {
        let json = r#"{"type":"report","parameters":{"recipient":"ops"}}"#;
        let req: JobRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.job_type, "report");
        assert!(req.schedule_time.is_none());
        assert!(req.cron_expression.is_none());
        assert_eq!(req.parameters["recipient"], "ops");
    }

    #[test]
    fn test_reschedule_request_defaults() {
        let req: RescheduleRequest = serde_json::from_str("{}").unwrap();
        assert!(req.new_schedule_time.is_none());
        assert!(req.new_cron_expression.is_none());
    }
}
