//! Job service: the only place where a job's status changes.
//!
//! Every transition is validated against the job's current status and then
//! persisted with a conditional write on the job's version, so a concurrent
//! claim, run or user action is never silently overwritten.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use tracing::{debug, warn};

use chronos_config::ChronosConfig;
use chronos_storage::{JobStore, StorageError};
use chronos_types::{ExecutionLog, Job, JobRequest, JobStatus, RescheduleRequest};

use crate::cron_expr;
use crate::error::JobError;
use crate::executor::{ExecutionFailure, JobExecutor};
use crate::logger::ExecutionLogger;
use crate::retry::{RetryDecision, RetryPolicy};

/// Conditional writes retried before reporting a conflict.
const MAX_TRANSITION_ATTEMPTS: usize = 3;

const DEFAULT_DELAY_SECS: i64 = 60;

fn validate_request(request: &JobRequest) -> Result<(), JobError> {
    if request.job_type.trim().is_empty() {
        return Err(JobError::Validation("Type is required".to_string()));
    }
    if let Some(expr) = &request.cron_expression {
        check_cron(expr)?;
    }
    Ok(())
}

fn check_cron(expr: &str) -> Result<(), JobError> {
    if cron_expr::validate(expr) {
        Ok(())
    } else {
        Err(JobError::Validation(format!("Invalid cron expression: {expr}")))
    }
}

pub struct JobService {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn JobExecutor>,
    retry: RetryPolicy,
    logger: ExecutionLogger,
    default_delay: TimeDelta,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            store,
            executor,
            retry: RetryPolicy::default(),
            logger: ExecutionLogger,
            default_delay: TimeDelta::seconds(DEFAULT_DELAY_SECS),
        }
    }

    /// Build a service with the retry and scheduling settings from `config`.
    pub fn from_config(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn JobExecutor>,
        config: &ChronosConfig,
    ) -> Self {
        Self::new(store, executor)
            .with_retry_policy(RetryPolicy::from(&config.retry))
            .with_default_delay(TimeDelta::seconds(config.scheduler.default_delay_secs))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Delay applied to jobs created without a schedule time.
    pub fn with_default_delay(mut self, delay: TimeDelta) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    // ─── Queries ───────────────────────────────────────────

    pub async fn get(&self, id: &str) -> Result<Job, JobError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<Job>, JobError> {
        Ok(self.store.find_all().await?)
    }

    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobError> {
        Ok(self.store.find_by_status(status).await?)
    }

    // ─── Lifecycle ─────────────────────────────────────────

    pub async fn create(&self, request: JobRequest) -> Result<Job, JobError> {
        validate_request(&request)?;

        let schedule_time = request
            .schedule_time
            .unwrap_or_else(|| Utc::now() + self.default_delay);
        let mut job = Job::new(request.job_type, schedule_time).with_parameters(request.parameters);
        job.cron_expression = request.cron_expression;

        self.logger.info(Some(&mut job), "Job created");
        Ok(self.store.save(&job).await?)
    }

    /// Overwrite the type and apply whichever optional fields are supplied.
    /// Allowed in any status; the status itself is left alone.
    pub async fn update(&self, id: &str, request: JobRequest) -> Result<Job, JobError> {
        validate_request(&request)?;

        self.transition(id, |job| {
            job.job_type = request.job_type.clone();
            if let Some(at) = request.schedule_time {
                job.schedule_time = at;
            }
            if let Some(expr) = &request.cron_expression {
                job.cron_expression = Some(expr.clone());
            }
            if !request.parameters.is_empty() {
                job.parameters = request.parameters.clone();
            }
            self.logger.info(Some(job), "Job updated by user");
            Ok(())
        })
        .await
    }

    /// Delete a job in any status.
    pub async fn delete(&self, id: &str) -> Result<(), JobError> {
        if !self.store.exists_by_id(id).await? {
            return Err(JobError::NotFound(id.to_string()));
        }
        self.store.delete_by_id(id).await?;
        self.logger.info(None, format!("Job {id} deleted"));
        Ok(())
    }

    /// Run a job now, regardless of its schedule time.
    ///
    /// Only PENDING and FAILED jobs are executable. Executor failures are
    /// absorbed by the retry policy and show up in the returned job.
    pub async fn execute(&self, id: &str) -> Result<Job, JobError> {
        let job = self.get(id).await?;
        if !job.status.is_executable() {
            return Err(not_executable(&job));
        }

        match self
            .store
            .claim(id, &[JobStatus::Pending, JobStatus::Failed])
            .await?
        {
            Some(claimed) => self.run_claimed(claimed).await,
            None => Err(not_executable(&self.get(id).await?)),
        }
    }

    /// Claim a due PENDING job and run it.
    ///
    /// Returns `Ok(None)` when the claim is lost to another worker.
    pub async fn execute_due(&self, id: &str) -> Result<Option<Job>, JobError> {
        match self.store.claim(id, &[JobStatus::Pending]).await? {
            Some(claimed) => self.run_claimed(claimed).await.map(Some),
            None => Ok(None),
        }
    }

    /// Create a brand-new PENDING job from an existing one. The original is untouched.
    pub async fn rerun(
        &self,
        id: &str,
        schedule_time: Option<DateTime<Utc>>,
    ) -> Result<Job, JobError> {
        let original = self.get(id).await?;

        let mut job = Job::new(original.job_type, schedule_time.unwrap_or_else(Utc::now))
            .with_parameters(original.parameters);
        job.cron_expression = original.cron_expression;

        let saved = self.store.save(&job).await?;
        self.logger.info(None, format!("Job {id} rerun as {}", saved.id));
        Ok(saved)
    }

    pub async fn cancel(&self, id: &str) -> Result<Job, JobError> {
        self.transition(id, |job| {
            if job.status.is_terminal() {
                return Err(JobError::StateConflict(format!(
                    "Job with id {} is already {}",
                    job.id, job.status
                )));
            }
            job.status = JobStatus::Cancelled;
            self.logger.info(Some(job), "Job cancelled by user");
            Ok(())
        })
        .await
    }

    /// Move a job back to PENDING with a new time and/or cron expression.
    ///
    /// A new schedule time alone turns the job into a one-time job.
    pub async fn reschedule(
        &self,
        id: &str,
        request: RescheduleRequest,
    ) -> Result<Job, JobError> {
        if let Some(expr) = &request.new_cron_expression {
            check_cron(expr)?;
        }

        self.transition(id, |job| {
            if job.status.is_terminal() {
                return Err(JobError::StateConflict(format!(
                    "Job with id {} cannot be rescheduled. Current status: {}",
                    job.id, job.status
                )));
            }
            if let Some(at) = request.new_schedule_time {
                job.schedule_time = at;
                job.cron_expression = None;
            }
            if let Some(expr) = &request.new_cron_expression {
                job.cron_expression = Some(expr.clone());
            }
            job.status = JobStatus::Pending;
            self.logger.info(Some(job), "Job rescheduled by user");
            Ok(())
        })
        .await
    }

    pub async fn pause(&self, id: &str) -> Result<Job, JobError> {
        self.transition(id, |job| {
            if job.status.is_terminal() {
                return Err(JobError::StateConflict(format!(
                    "Job with id {} is already {}",
                    job.id, job.status
                )));
            }
            job.status = JobStatus::Paused;
            self.logger.info(Some(job), "Job paused by user");
            Ok(())
        })
        .await
    }

    pub async fn resume(&self, id: &str) -> Result<Job, JobError> {
        self.transition(id, |job| {
            if job.status != JobStatus::Paused {
                return Err(JobError::StateConflict(format!(
                    "Job with id {} is not in PAUSED state",
                    job.id
                )));
            }
            job.status = JobStatus::Pending;
            self.logger.info(Some(job), "Job resumed by user");
            Ok(())
        })
        .await
    }

    /// Fail a PENDING recurring job whose stored cron expression no longer parses.
    pub async fn fail_unschedulable(&self, id: &str, reason: &str) -> Result<Job, JobError> {
        self.transition(id, |job| {
            if job.status != JobStatus::Pending {
                return Err(JobError::StateConflict(format!(
                    "Job with id {} is no longer PENDING",
                    job.id
                )));
            }
            job.status = JobStatus::Failed;
            self.logger
                .error(Some(job), format!("Cannot schedule job: {reason}"));
            Ok(())
        })
        .await
    }

    // ─── Internals ─────────────────────────────────────────

    /// Load, mutate and conditionally save a job, retrying when another
    /// writer touched it in between.
    async fn transition<F>(&self, id: &str, mut apply: F) -> Result<Job, JobError>
    where
        F: FnMut(&mut Job) -> Result<(), JobError> + Send,
    {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let mut job = self.get(id).await?;
            apply(&mut job)?;
            if let Some(saved) = self.store.save_if_unchanged(&job).await? {
                return Ok(saved);
            }
            debug!(job_id = %id, "Job changed concurrently, retrying");
        }
        Err(JobError::StateConflict(format!(
            "Job {id} was modified concurrently"
        )))
    }

    /// Run the executor for a job this service has claimed, then persist the outcome.
    async fn run_claimed(&self, claimed: Job) -> Result<Job, JobError> {
        let mut job = claimed;
        let first_new_log = job.execution_logs.len();
        self.logger.info(Some(&mut job), "Job execution started");
        let started = job.execution_logs[first_new_log..].to_vec();

        let outcome = AssertUnwindSafe(self.executor.run(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ExecutionFailure::new("executor panicked")));

        let now = Utc::now();
        let run_id = job.run_id.clone();
        self.apply_outcome(&mut job, &outcome, now);
        if let Some(saved) = self.store.save_if_unchanged(&job).await? {
            return Ok(saved);
        }
        let entries = job.execution_logs[first_new_log..].to_vec();
        self.merge_run(&job.id, run_id, &started, &entries, &outcome, now)
            .await
    }

    fn apply_outcome(
        &self,
        job: &mut Job,
        outcome: &Result<(), ExecutionFailure>,
        now: DateTime<Utc>,
    ) {
        match outcome {
            Ok(()) => self.on_success(job, now),
            Err(failure) => self.on_failure(job, failure, now),
        }
    }

    fn on_success(&self, job: &mut Job, now: DateTime<Utc>) {
        self.logger
            .info(Some(&mut *job), "Job execution completed successfully");

        let Some(expr) = job.cron_expression.clone() else {
            job.status = JobStatus::Completed;
            return;
        };

        match cron_expr::next_trigger(&expr, now) {
            Ok(Some(next)) => {
                job.schedule_time = next;
                job.status = JobStatus::Pending;
                debug!(job_id = %job.id, next_run = %next, "Recurring job rescheduled");
            }
            Ok(None) => {
                job.status = JobStatus::Pending;
                self.logger.warning(
                    Some(job),
                    format!("No further occurrences for cron expression {expr}"),
                );
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                self.logger
                    .error(Some(job), format!("Cannot compute next run: {e}"));
            }
        }
    }

    fn on_failure(&self, job: &mut Job, failure: &ExecutionFailure, now: DateTime<Utc>) {
        job.retry_count = job.retry_count.saturating_add(1);

        match self.retry.decide(job.retry_count) {
            RetryDecision::Retry { attempt, delay } => {
                job.schedule_time = now + delay;
                job.status = JobStatus::Pending;
                self.logger.warning(
                    Some(job),
                    format!(
                        "Job failed, scheduled retry #{attempt} in {}s: {failure}",
                        delay.num_seconds()
                    ),
                );
            }
            RetryDecision::GiveUp => {
                job.status = JobStatus::Failed;
                let message = format!(
                    "Job failed permanently after {} retries: {failure}",
                    job.retry_count
                );
                self.logger.error(Some(job), message);
            }
        }
    }

    /// Persist a run whose job was written by someone else while it ran.
    ///
    /// If this run still owns the job (RUNNING under the same `run_id`), the
    /// outcome is applied on top of the current record so concurrent edits
    /// survive. Otherwise the job was paused, cancelled, rescheduled or
    /// re-claimed meanwhile: that state wins and only this run's log
    /// entries are appended.
    async fn merge_run(
        &self,
        id: &str,
        run_id: Option<String>,
        started: &[ExecutionLog],
        entries: &[ExecutionLog],
        outcome: &Result<(), ExecutionFailure>,
        now: DateTime<Utc>,
    ) -> Result<Job, JobError> {
        loop {
            let Some(mut current) = self.store.find_by_id(id).await? else {
                warn!(job_id = %id, "Job was deleted during execution");
                return Err(JobError::NotFound(id.to_string()));
            };

            if current.status != JobStatus::Running || current.run_id != run_id {
                match self.store.append_logs(id, entries).await {
                    Ok(()) => {}
                    Err(StorageError::NotFound(_)) => {
                        warn!(job_id = %id, "Job was deleted during execution");
                        return Err(JobError::NotFound(id.to_string()));
                    }
                    Err(e) => return Err(e.into()),
                }
                warn!(
                    job_id = %id,
                    status = %current.status,
                    "Job changed state during execution; keeping the new state"
                );
                return self.get(id).await;
            }

            current.execution_logs.extend_from_slice(started);
            self.apply_outcome(&mut current, outcome, now);
            if let Some(saved) = self.store.save_if_unchanged(&current).await? {
                debug!(job_id = %id, "Merged run outcome onto concurrently edited job");
                return Ok(saved);
            }
        }
    }
}

fn not_executable(job: &Job) -> JobError {
    JobError::StateConflict(format!(
        "Job {} cannot be executed. Current status: {}",
        job.id, job.status
    ))
}
