//! Periodic scheduler: finds due jobs and dispatches them through the service.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chronos_config::SchedulerConfig;
use chronos_storage::JobStore;
use chronos_types::{Job, JobStatus};

use crate::cron_expr;
use crate::error::JobError;
use crate::service::JobService;

/// Counters for a single scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// PENDING jobs whose schedule time had passed.
    pub scanned: usize,
    /// Jobs claimed and run by this pass.
    pub dispatched: usize,
    /// Jobs not yet due, or claimed elsewhere first.
    pub skipped: usize,
    /// Recurring jobs moved to FAILED because their cron expression no longer parses.
    pub unschedulable: usize,
    pub errors: usize,
}

enum Eligibility {
    Due,
    NotYet,
    Unschedulable(String),
}

enum Dispatch {
    Executed,
    Skipped,
    Errored,
}

pub struct Scheduler {
    store: Arc<dyn JobStore>,
    service: Arc<JobService>,
    tick_interval: Duration,
    workers: usize,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, service: Arc<JobService>) -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            store,
            service,
            tick_interval: Duration::from_secs(defaults.tick_interval_secs),
            workers: defaults.workers,
        }
    }

    pub fn from_config(
        store: Arc<dyn JobStore>,
        service: Arc<JobService>,
        config: &SchedulerConfig,
    ) -> Self {
        Self::new(store, service)
            .with_tick_interval(Duration::from_secs(config.tick_interval_secs))
            .with_workers(config.workers)
    }

    /// Set the polling interval. Zero is raised to one millisecond.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Maximum number of jobs run concurrently within one tick.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Run the scheduler loop until `cancel` fires.
    ///
    /// A failing tick is logged and the loop carries on with the next one.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "Job scheduler started (tick interval: {:?}, workers: {})",
            self.tick_interval, self.workers
        );

        let mut interval = time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report.scanned > 0 => {
                            info!(
                                dispatched = report.dispatched,
                                skipped = report.skipped,
                                unschedulable = report.unschedulable,
                                errors = report.errors,
                                "Scheduler tick finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!("Scheduler tick failed: {e}"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("Job scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// One pass: load overdue PENDING jobs, keep the due ones, run them.
    pub async fn tick(&self) -> Result<TickReport, JobError> {
        debug!("Checking for pending jobs");
        let now = Utc::now();
        let candidates = self
            .store
            .find_scheduled_until(&[JobStatus::Pending], now)
            .await?;

        let mut report = TickReport {
            scanned: candidates.len(),
            ..Default::default()
        };

        let mut due = Vec::new();
        for job in candidates {
            match eligibility(&job, now) {
                Eligibility::Due => due.push(job),
                Eligibility::NotYet => report.skipped += 1,
                Eligibility::Unschedulable(reason) => {
                    match self.service.fail_unschedulable(&job.id, &reason).await {
                        Ok(_) => {
                            warn!(job_id = %job.id, "Failed job with unusable cron expression: {reason}");
                            report.unschedulable += 1;
                        }
                        Err(e) => {
                            error!(job_id = %job.id, "Failed to mark job unschedulable: {e}");
                            report.errors += 1;
                        }
                    }
                }
            }
        }

        let outcomes: Vec<Dispatch> = stream::iter(due)
            .map(|job| self.dispatch(job))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Dispatch::Executed => report.dispatched += 1,
                Dispatch::Skipped => report.skipped += 1,
                Dispatch::Errored => report.errors += 1,
            }
        }
        Ok(report)
    }

    async fn dispatch(&self, job: Job) -> Dispatch {
        match self.service.execute_due(&job.id).await {
            Ok(Some(done)) => {
                debug!(job_id = %done.id, status = %done.status, "Dispatched job");
                Dispatch::Executed
            }
            Ok(None) => {
                debug!(job_id = %job.id, "Job claimed elsewhere, skipping");
                Dispatch::Skipped
            }
            Err(e) => {
                error!(job_id = %job.id, "Failed to dispatch job: {e}");
                Dispatch::Errored
            }
        }
    }
}

/// Whether a PENDING job whose schedule time has passed should run now.
///
/// A recurring job additionally waits for its cron expression to fire at or
/// after its schedule time.
fn eligibility(job: &Job, now: DateTime<Utc>) -> Eligibility {
    if job.schedule_time > now {
        return Eligibility::NotYet;
    }
    let Some(expr) = &job.cron_expression else {
        return Eligibility::Due;
    };
    match cron_expr::next_trigger(expr, job.schedule_time - TimeDelta::seconds(1)) {
        Ok(Some(next)) if next <= now => Eligibility::Due,
        Ok(_) => Eligibility::NotYet,
        Err(JobError::Validation(reason)) => Eligibility::Unschedulable(reason),
        Err(e) => Eligibility::Unschedulable(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use chronos_storage::SqliteJobStore;
    use chronos_types::JobRequest;

    use crate::executor::{ExecutionFailure, JobExecutor};
    use crate::testing::{CountingExecutor, ScriptedExecutor, service, store};

    fn scheduler(store: Arc<SqliteJobStore>, service: JobService) -> Scheduler {
        let store: Arc<dyn JobStore> = store;
        Scheduler::new(store, Arc::new(service)).with_tick_interval(Duration::from_millis(20))
    }

    fn past(secs: i64) -> DateTime<Utc> {
        Utc::now() - TimeDelta::seconds(secs)
    }

    #[tokio::test]
    async fn test_due_one_time_job_completes() {
        let store = store();
        let executor = CountingExecutor::ok();
        let svc = service(store.clone(), executor.clone());
        let job = svc
            .create(JobRequest::new("report").with_schedule_time(past(5)))
            .await
            .unwrap();

        let sched = scheduler(store.clone(), svc);
        let report = sched.tick().await.unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(report.dispatched, 1);
        assert_eq!(executor.calls(), 1);
        let done = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_future_job_is_not_run() {
        let store = store();
        let executor = CountingExecutor::ok();
        let svc = service(store.clone(), executor.clone());
        svc.create(JobRequest::new("report")).await.unwrap();

        let report = scheduler(store, svc).tick().await.unwrap();
        assert_eq!(report, TickReport::default());
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_paused_and_cancelled_jobs_are_not_run() {
        let store = store();
        let executor = CountingExecutor::ok();
        let svc = service(store.clone(), executor.clone());
        let paused = svc
            .create(JobRequest::new("a").with_schedule_time(past(5)))
            .await
            .unwrap();
        let cancelled = svc
            .create(JobRequest::new("b").with_schedule_time(past(5)))
            .await
            .unwrap();
        svc.pause(&paused.id).await.unwrap();
        svc.cancel(&cancelled.id).await.unwrap();

        let report = scheduler(store.clone(), svc).tick().await.unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(executor.calls(), 0);
        let stored = store.find_by_id(&paused.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Paused);
    }

    #[tokio::test]
    async fn test_recurring_job_runs_on_boundary() {
        let store = store();
        let executor = CountingExecutor::ok();
        let svc = service(store.clone(), executor.clone());
        let job = svc
            .create(
                JobRequest::new("heartbeat")
                    .with_schedule_time(past(2))
                    .with_cron_expression("* * * * * *"),
            )
            .await
            .unwrap();

        let report = scheduler(store.clone(), svc).tick().await.unwrap();
        assert_eq!(report.dispatched, 1);
        let stored = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(stored.schedule_time > job.schedule_time);
    }

    #[tokio::test]
    async fn test_recurring_job_waits_for_next_boundary() {
        let store = store();
        let executor = CountingExecutor::ok();
        let svc = service(store.clone(), executor.clone());
        svc.create(
            JobRequest::new("leap-day")
                .with_schedule_time(past(5))
                .with_cron_expression("0 0 0 29 2 *"),
        )
        .await
        .unwrap();

        let report = scheduler(store, svc).tick().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_ticks_run_job_once() {
        let store = store();
        let executor = CountingExecutor::slow(Duration::from_millis(100));
        let svc = service(store.clone(), executor.clone());
        svc.create(JobRequest::new("report").with_schedule_time(past(5)))
            .await
            .unwrap();

        let sched = scheduler(store, svc);
        let (a, b) = tokio::join!(sched.tick(), sched.tick());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(executor.calls(), 1);
        assert_eq!(a.dispatched + b.dispatched, 1);
    }

    #[tokio::test]
    async fn test_failed_job_is_not_selected_again() {
        let store = store();
        let executor = CountingExecutor::failing("boom");
        let svc = service(store.clone(), executor.clone())
            .with_retry_policy(crate::RetryPolicy::new(1, 2));
        let job = svc
            .create(JobRequest::new("report").with_schedule_time(past(5)))
            .await
            .unwrap();

        let sched = scheduler(store.clone(), svc);
        sched.tick().await.unwrap();
        let stored = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);

        let report = sched.tick().await.unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_jobs() {
        let store = store();
        let executor = ScriptedExecutor::new(vec![Err(ExecutionFailure::new("boom"))]);
        let svc = service(store.clone(), executor).with_retry_policy(crate::RetryPolicy::new(1, 2));
        for name in ["a", "b", "c"] {
            svc.create(JobRequest::new(name).with_schedule_time(past(5)))
                .await
                .unwrap();
        }

        let report = scheduler(store.clone(), svc).tick().await.unwrap();
        assert_eq!(report.dispatched, 3);
        assert_eq!(report.errors, 0);

        let completed = store.find_by_status(JobStatus::Completed).await.unwrap();
        let failed = store.find_by_status(JobStatus::Failed).await.unwrap();
        assert_eq!(completed.len(), 2);
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_stored_cron_fails_job_once() {
        let store = store();
        let executor = CountingExecutor::ok();
        let mut job = Job::new("broken", past(5));
        job.cron_expression = Some("definitely not cron".into());
        store.save(&job).await.unwrap();

        let svc = service(store.clone(), executor.clone());
        let sched = scheduler(store.clone(), svc);
        let report = sched.tick().await.unwrap();
        assert_eq!(report.unschedulable, 1);
        assert_eq!(report.dispatched, 0);
        assert_eq!(executor.calls(), 0);

        let stored = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        let last = &stored.execution_logs.last().unwrap().message;
        assert!(last.starts_with("Cannot schedule job: Invalid cron expression"));

        let report = sched.tick().await.unwrap();
        assert_eq!(report, TickReport::default());
    }

    /// Deletes jobs of one type from the store while they run.
    struct DeletingExecutor {
        store: Arc<SqliteJobStore>,
        victim: &'static str,
    }

    #[async_trait]
    impl JobExecutor for DeletingExecutor {
        async fn run(&self, job: &Job) -> Result<(), ExecutionFailure> {
            if job.job_type == self.victim {
                self.store
                    .delete_by_id(&job.id)
                    .await
                    .map_err(|e| ExecutionFailure::new(e.to_string()))?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_error_does_not_stop_other_jobs() {
        let store = store();
        let executor = Arc::new(DeletingExecutor {
            store: store.clone(),
            victim: "doomed",
        });
        let svc = service(store.clone(), executor);
        for name in ["a", "doomed", "b"] {
            svc.create(JobRequest::new(name).with_schedule_time(past(5)))
                .await
                .unwrap();
        }

        let report = scheduler(store.clone(), svc).tick().await.unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.errors, 1);

        let completed = store.find_by_status(JobStatus::Completed).await.unwrap();
        let mut types: Vec<_> = completed.iter().map(|j| j.job_type.as_str()).collect();
        types.sort();
        assert_eq!(types, vec!["a", "b"]);
        assert_eq!(store.find_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_loop_dispatches_and_stops_on_cancel() {
        let store = store();
        let executor = CountingExecutor::ok();
        let svc = service(store.clone(), executor.clone());
        let job = svc
            .create(JobRequest::new("report").with_schedule_time(past(1)))
            .await
            .unwrap();

        let sched = Arc::new(scheduler(store.clone(), svc));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sched.run(cancel.clone()));

        for _ in 0..100 {
            let stored = store.find_by_id(&job.id).await.unwrap().unwrap();
            if stored.status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(executor.calls(), 1);
    }
}
