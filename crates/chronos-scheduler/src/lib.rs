//! chronos-scheduler: job lifecycle and scheduling engine.
//!
//! - [`JobService`] owns every status transition (create, execute, cancel,
//!   pause, resume, reschedule, rerun) and persists each one through a
//!   [`chronos_storage::JobStore`].
//! - [`Scheduler`] ticks on a fixed interval, finds due jobs and dispatches
//!   them through the service. Each dispatch claims the job atomically in the
//!   store before the executor runs, so overlapping ticks or several
//!   scheduler instances never run the same occurrence twice.
//! - [`RetryPolicy`] turns execution failures into exponential-backoff
//!   retries or a permanent FAILED status.

pub mod cron_expr;
pub mod error;
pub mod executor;
pub mod logger;
pub mod retry;
pub mod scheduler;
pub mod service;

#[cfg(test)]
mod testing;

pub use cron_expr::CronExpression;
pub use error::{JobError, JobErrorKind};
pub use executor::{ExecutionFailure, JobExecutor};
pub use logger::ExecutionLogger;
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{Scheduler, TickReport};
pub use service::JobService;
