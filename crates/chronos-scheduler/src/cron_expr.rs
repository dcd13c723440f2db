//! Cron expression parsing and next-trigger evaluation.
//!
//! Expressions use the seconds-resolution format of the `cron` crate:
//! `sec min hour day-of-month month day-of-week [year]`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::JobError;

/// Parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronExpression {
    schedule: Schedule,
    expression: String,
}

impl CronExpression {
    /// Parse a cron expression.
    ///
    /// ```
    /// use chronos_scheduler::CronExpression;
    ///
    /// // Every five seconds
    /// let expr = CronExpression::parse("*/5 * * * * *").unwrap();
    /// assert_eq!(expr.expression(), "*/5 * * * * *");
    ///
    /// assert!(CronExpression::parse("not-a-cron").is_err());
    /// ```
    pub fn parse(expression: &str) -> Result<Self, JobError> {
        let schedule = Schedule::from_str(expression.trim()).map_err(|e| {
            JobError::Validation(format!("Invalid cron expression: {expression}: {e}"))
        })?;

        Ok(Self {
            schedule,
            expression: expression.to_string(),
        })
    }

    /// First trigger strictly after `after`, or `None` when the expression
    /// has no further occurrences (year-bounded expressions).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

/// Pure syntax check.
pub fn validate(expression: &str) -> bool {
    CronExpression::parse(expression).is_ok()
}

/// Parse `expression` and return its first trigger strictly after `reference`.
pub fn next_trigger(
    expression: &str,
    reference: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, JobError> {
    Ok(CronExpression::parse(expression)?.next_after(reference))
}
