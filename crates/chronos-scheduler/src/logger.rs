//! Execution logger: job history plus the system-wide tracing stream.

use tracing::{error, info, warn};

use chronos_types::{Job, LogLevel};

/// Appends timestamped messages to a job's history and always emits them
/// as tracing events, scoped by job id (or "system" when no job is given).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionLogger;

impl ExecutionLogger {
    pub fn log(&self, job: Option<&mut Job>, message: impl Into<String>, level: LogLevel) {
        let message = message.into();
        let scope = job.as_deref().map_or("system", |j| j.id.as_str());
        match level {
            LogLevel::Info => info!(job_id = %scope, "{message}"),
            LogLevel::Warning => warn!(job_id = %scope, "{message}"),
            LogLevel::Error => error!(job_id = %scope, "{message}"),
        }
        if let Some(job) = job {
            job.push_log(message);
        }
    }

    pub fn info(&self, job: Option<&mut Job>, message: impl Into<String>) {
        self.log(job, message, LogLevel::Info);
    }

    pub fn warning(&self, job: Option<&mut Job>, message: impl Into<String>) {
        self.log(job, message, LogLevel::Warning);
    }

    pub fn error(&self, job: Option<&mut Job>, message: impl Into<String>) {
        self.log(job, message, LogLevel::Error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_log_appends_to_job() {
        let logger = ExecutionLogger;
        let mut job = Job::new("report", Utc::now());
        logger.info(Some(&mut job), "Job created");
        logger.warning(Some(&mut job), "retrying");
        logger.error(Some(&mut job), "gave up");

        let messages: Vec<_> = job.execution_logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["Job created", "retrying", "gave up"]);
        assert!(job.execution_logs[0].timestamp <= job.execution_logs[2].timestamp);
    }

    #[test]
    fn test_system_log_without_job() {
        // Only emits to tracing; must not panic.
        ExecutionLogger.info(None, "Checking for pending jobs");
    }
}
