//! Executors and fixtures shared by the service and scheduler tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use chronos_storage::{JobStore, SqliteJobStore};
use chronos_types::Job;

use crate::executor::{ExecutionFailure, JobExecutor};
use crate::service::JobService;

/// Counts calls and optionally sleeps before answering.
#[derive(Default)]
pub struct CountingExecutor {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
    pub fail_with: Option<String>,
}

impl CountingExecutor {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(reason.to_string()),
            ..Default::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobExecutor for CountingExecutor {
    async fn run(&self, _job: &Job) -> Result<(), ExecutionFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.fail_with {
            Some(reason) => Err(ExecutionFailure::new(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Answers from a fixed script, then succeeds.
pub struct ScriptedExecutor {
    outcomes: Mutex<VecDeque<Result<(), ExecutionFailure>>>,
}

impl ScriptedExecutor {
    pub fn new(outcomes: Vec<Result<(), ExecutionFailure>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
        })
    }
}

#[async_trait]
impl JobExecutor for ScriptedExecutor {
    async fn run(&self, _job: &Job) -> Result<(), ExecutionFailure> {
        self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

pub struct PanickingExecutor;

#[async_trait]
impl JobExecutor for PanickingExecutor {
    async fn run(&self, _job: &Job) -> Result<(), ExecutionFailure> {
        panic!("executor blew up");
    }
}

pub fn store() -> Arc<SqliteJobStore> {
    Arc::new(SqliteJobStore::open_in_memory().unwrap())
}

pub fn service(store: Arc<SqliteJobStore>, executor: Arc<dyn JobExecutor>) -> JobService {
    let store: Arc<dyn JobStore> = store;
    JobService::new(store, executor)
}

pub fn messages(job: &Job) -> Vec<&str> {
    job.execution_logs.iter().map(|l| l.message.as_str()).collect()
}
