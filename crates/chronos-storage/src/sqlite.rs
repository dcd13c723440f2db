//! SQLite-backed job store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use chronos_types::{ExecutionLog, Job, JobStatus};

use crate::{JobStore, Result, StorageError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        job_type TEXT NOT NULL,
        status TEXT NOT NULL,
        schedule_time INTEGER NOT NULL,
        cron_expression TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        execution_logs TEXT NOT NULL DEFAULT '[]',
        parameters TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        version INTEGER NOT NULL DEFAULT 0,
        run_id TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_status_schedule
        ON jobs (status, schedule_time);";

const SELECT_COLUMNS: &str = "SELECT id, job_type, status, schedule_time, cron_expression, retry_count,
        execution_logs, parameters, created_at, updated_at, version, run_id FROM jobs";

/// Raw column values, decoded into a [`Job`] outside the rusqlite closure.
struct JobRow {
    id: String,
    job_type: String,
    status: String,
    schedule_time: i64,
    cron_expression: Option<String>,
    retry_count: i64,
    execution_logs: String,
    parameters: String,
    created_at: i64,
    updated_at: i64,
    version: i64,
    run_id: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_type: row.get(1)?,
            status: row.get(2)?,
            schedule_time: row.get(3)?,
            cron_expression: row.get(4)?,
            retry_count: row.get(5)?,
            execution_logs: row.get(6)?,
            parameters: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            version: row.get(10)?,
            run_id: row.get(11)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let corrupt = |reason: String| StorageError::Corrupt {
            id: self.id.clone(),
            reason,
        };
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(|e| corrupt(e.to_string()))?;
        let schedule_time = from_millis(self.schedule_time)
            .ok_or_else(|| corrupt(format!("schedule_time {}", self.schedule_time)))?;
        let created_at = from_millis(self.created_at)
            .ok_or_else(|| corrupt(format!("created_at {}", self.created_at)))?;
        let updated_at = from_millis(self.updated_at)
            .ok_or_else(|| corrupt(format!("updated_at {}", self.updated_at)))?;
        let retry_count = u32::try_from(self.retry_count)
            .map_err(|_| corrupt(format!("retry_count {}", self.retry_count)))?;
        let version = u64::try_from(self.version)
            .map_err(|_| corrupt(format!("version {}", self.version)))?;

        Ok(Job {
            execution_logs: serde_json::from_str(&self.execution_logs)?,
            parameters: serde_json::from_str(&self.parameters)?,
            id: self.id,
            job_type: self.job_type,
            status,
            schedule_time,
            cron_expression: self.cron_expression,
            retry_count,
            created_at,
            updated_at,
            version,
            run_id: self.run_id,
        })
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn status_placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn query_jobs(conn: &Connection, sql: &str, params: Vec<Value>) -> Result<Vec<Job>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), JobRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(JobRow::into_job).collect()
}

fn get_job(conn: &Connection, id: &str) -> Result<Option<Job>> {
    let row = conn
        .query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            rusqlite::params![id],
            JobRow::from_row,
        )
        .optional()?;
    row.map(JobRow::into_job).transpose()
}

/// Stamp `updated_at`, bump the version and serialize the JSON columns.
fn prepare(job: &Job) -> Result<(Job, String, String)> {
    let mut job = job.clone();
    job.updated_at = Utc::now();
    job.version += 1;
    let logs = serde_json::to_string(&job.execution_logs)?;
    let parameters = serde_json::to_string(&job.parameters)?;
    Ok((job, logs, parameters))
}

/// SQLite-based job store.
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Job store opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut *conn)
        })
        .await?
    }

    async fn find_scheduled(
        &self,
        statuses: &[JobStatus],
        instant: DateTime<Utc>,
        op: &'static str,
    ) -> Result<Vec<Job>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "{SELECT_COLUMNS} WHERE schedule_time {op} ?1 AND status IN ({})
             ORDER BY schedule_time ASC",
            status_placeholders(2, statuses.len())
        );
        let mut params = vec![Value::Integer(instant.timestamp_millis())];
        params.extend(statuses.iter().map(|s| Value::Text(s.as_str().to_string())));
        self.with_conn(move |conn| query_jobs(conn, &sql, params))
            .await
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn save(&self, job: &Job) -> Result<Job> {
        let (job, logs, parameters) = prepare(job)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO jobs
                    (id, job_type, status, schedule_time, cron_expression, retry_count,
                     execution_logs, parameters, created_at, updated_at, version, run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                    job_type = excluded.job_type,
                    status = excluded.status,
                    schedule_time = excluded.schedule_time,
                    cron_expression = excluded.cron_expression,
                    retry_count = excluded.retry_count,
                    execution_logs = excluded.execution_logs,
                    parameters = excluded.parameters,
                    updated_at = excluded.updated_at,
                    version = jobs.version + 1,
                    run_id = excluded.run_id",
                rusqlite::params![
                    job.id,
                    job.job_type,
                    job.status.as_str(),
                    job.schedule_time.timestamp_millis(),
                    job.cron_expression,
                    job.retry_count,
                    logs,
                    parameters,
                    job.created_at.timestamp_millis(),
                    job.updated_at.timestamp_millis(),
                    job.version as i64,
                    job.run_id,
                ],
            )?;
            get_job(conn, &job.id)?.ok_or(StorageError::NotFound(job.id))
        })
        .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
        let id = id.to_string();
        self.with_conn(move |conn| get_job(conn, &id)).await
    }

    async fn find_all(&self) -> Result<Vec<Job>> {
        self.with_conn(|conn| {
            query_jobs(
                conn,
                &format!("{SELECT_COLUMNS} ORDER BY created_at ASC"),
                Vec::new(),
            )
        })
        .await
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        self.with_conn(move |conn| {
            query_jobs(
                conn,
                &format!("{SELECT_COLUMNS} WHERE status = ?1 ORDER BY created_at ASC"),
                vec![Value::Text(status.as_str().to_string())],
            )
        })
        .await
    }

    async fn find_scheduled_before(
        &self,
        statuses: &[JobStatus],
        instant: DateTime<Utc>,
    ) -> Result<Vec<Job>> {
        self.find_scheduled(statuses, instant, "<").await
    }

    async fn find_scheduled_until(
        &self,
        statuses: &[JobStatus],
        instant: DateTime<Utc>,
    ) -> Result<Vec<Job>> {
        self.find_scheduled(statuses, instant, "<=").await
    }

    async fn exists_by_id(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM jobs WHERE id = ?1",
                    rusqlite::params![id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let count = conn.execute("DELETE FROM jobs WHERE id = ?1", rusqlite::params![id])?;
            Ok(count > 0)
        })
        .await
    }

    async fn claim(&self, id: &str, from: &[JobStatus]) -> Result<Option<Job>> {
        if from.is_empty() {
            return Ok(None);
        }
        let id = id.to_string();
        let sql = format!(
            "UPDATE jobs SET status = ?1, updated_at = ?2, run_id = ?3, version = version + 1
             WHERE id = ?4 AND status IN ({})",
            status_placeholders(5, from.len())
        );
        let mut params = vec![
            Value::Text(JobStatus::Running.as_str().to_string()),
            Value::Integer(Utc::now().timestamp_millis()),
            Value::Text(uuid::Uuid::new_v4().to_string()),
            Value::Text(id.clone()),
        ];
        params.extend(from.iter().map(|s| Value::Text(s.as_str().to_string())));

        self.with_conn(move |conn| {
            let changed = conn.execute(&sql, rusqlite::params_from_iter(params))?;
            if changed == 0 {
                return Ok(None);
            }
            get_job(conn, &id)
        })
        .await
    }

    async fn save_if_unchanged(&self, job: &Job) -> Result<Option<Job>> {
        let expected = job.version;
        let (job, logs, parameters) = prepare(job)?;
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE jobs SET
                    job_type = ?1,
                    status = ?2,
                    schedule_time = ?3,
                    cron_expression = ?4,
                    retry_count = ?5,
                    execution_logs = ?6,
                    parameters = ?7,
                    updated_at = ?8,
                    version = ?9,
                    run_id = ?10
                 WHERE id = ?11 AND version = ?12",
                rusqlite::params![
                    job.job_type,
                    job.status.as_str(),
                    job.schedule_time.timestamp_millis(),
                    job.cron_expression,
                    job.retry_count,
                    logs,
                    parameters,
                    job.updated_at.timestamp_millis(),
                    job.version as i64,
                    job.run_id,
                    job.id,
                    expected as i64,
                ],
            )?;
            Ok((changed > 0).then_some(job))
        })
        .await
    }

    async fn append_logs(&self, id: &str, entries: &[ExecutionLog]) -> Result<()> {
        let id = id.to_string();
        let entries = entries.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let current: Option<String> = tx
                .query_row(
                    "SELECT execution_logs FROM jobs WHERE id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Err(StorageError::NotFound(id));
            };
            let mut logs: Vec<ExecutionLog> = serde_json::from_str(&current)?;
            logs.extend(entries);
            tx.execute(
                "UPDATE jobs SET execution_logs = ?1, updated_at = ?2, version = version + 1
                 WHERE id = ?3",
                rusqlite::params![
                    serde_json::to_string(&logs)?,
                    Utc::now().timestamp_millis(),
                    id
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
