//! Shell command executor used by the `chronos` daemon.
//!
//! Job parameters:
//! - `command` (string): run with `sh -c`. A job without one is a no-op.
//! - `timeout_secs` (integer, optional): overrides the default timeout.
//! - `working_dir` (string, optional): directory to run the command in.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use chronos_scheduler::{ExecutionFailure, JobExecutor};
use chronos_types::Job;

/// Default timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Characters of stderr kept in a failure reason.
const MAX_STDERR_CHARS: usize = 500;

pub struct CommandExecutor {
    default_timeout: Duration,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobExecutor for CommandExecutor {
    async fn run(&self, job: &Job) -> Result<(), ExecutionFailure> {
        let command = match job.parameters.get("command") {
            None => {
                debug!(job_id = %job.id, "No command parameter, nothing to run");
                return Ok(());
            }
            Some(value) => value
                .as_str()
                .ok_or_else(|| ExecutionFailure::new("Parameter 'command' must be a string"))?,
        };
        let timeout = job
            .parameters
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = job.parameters.get("working_dir").and_then(|v| v.as_str()) {
            cmd.current_dir(dir);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(job_id = %job.id, command, "Running job command");
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ExecutionFailure::new(format!(
                    "Command execution failed: {e}"
                )));
            }
            Err(_) => {
                return Err(ExecutionFailure::new(format!(
                    "Command timed out after {}s",
                    timeout.as_secs()
                )));
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let exit = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let stderr: String = String::from_utf8_lossy(&output.stderr)
            .trim()
            .chars()
            .take(MAX_STDERR_CHARS)
            .collect();
        let reason = if stderr.is_empty() {
            format!("Command exited with code {exit}")
        } else {
            format!("Command exited with code {exit}: {stderr}")
        };
        Err(ExecutionFailure::new(reason))
    }
}
