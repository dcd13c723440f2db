mod executor;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use chronos_config::ChronosConfig;
use chronos_scheduler::{JobService, Scheduler};
use chronos_storage::{JobStore, SqliteJobStore};
use chronos_types::{JobRequest, JobStatus, RescheduleRequest};

use crate::executor::CommandExecutor;

#[derive(Parser)]
#[command(name = "chronos", about = "Job lifecycle and scheduling engine")]
struct Cli {
    /// Config file (defaults to ~/.chronos/config.json5)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler daemon until Ctrl-C
    Run {
        /// Seconds between scans for due jobs (overrides config)
        #[arg(long)]
        tick_secs: Option<u64>,

        /// Jobs executed concurrently per tick (overrides config)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Create a job
    Create {
        #[command(flatten)]
        job: JobArgs,
    },
    /// List jobs
    List {
        /// Only show jobs with this status (e.g. PENDING)
        #[arg(long)]
        status: Option<JobStatus>,
    },
    /// Show a job with its execution history
    Get { id: String },
    /// Update a job's type, schedule or parameters
    Update {
        id: String,

        #[command(flatten)]
        job: JobArgs,
    },
    /// Delete a job
    Delete { id: String },
    /// Run a job now
    Execute { id: String },
    /// Create a fresh copy of a job
    Rerun {
        id: String,

        /// Schedule time of the copy, RFC 3339 (defaults to now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Cancel a job
    Cancel { id: String },
    /// Move a job back to PENDING with a new schedule
    Reschedule {
        id: String,

        /// New schedule time, RFC 3339
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// New cron expression
        #[arg(long)]
        cron: Option<String>,
    },
    /// Pause a job
    Pause { id: String },
    /// Resume a paused job
    Resume { id: String },
    /// Open the database and print the effective configuration
    Health,
}

#[derive(clap::Args)]
struct JobArgs {
    /// Job type
    #[arg(long = "type")]
    job_type: String,

    /// Schedule time, RFC 3339 (defaults to now + configured delay)
    #[arg(long)]
    at: Option<DateTime<Utc>>,

    /// Cron expression with a seconds field, e.g. "0 */5 * * * *"
    #[arg(long)]
    cron: Option<String>,

    /// Job parameter as key=value; values are parsed as JSON when possible
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,
}

impl From<JobArgs> for JobRequest {
    fn from(args: JobArgs) -> Self {
        JobRequest {
            job_type: args.job_type,
            schedule_time: args.at,
            cron_expression: args.cron,
            parameters: args.params.into_iter().collect::<HashMap<_, _>>(),
        }
    }
}

fn parse_param(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid key=value: no '=' found in '{s}'"))?;
    if key.is_empty() {
        return Err(format!("invalid key=value: empty key in '{s}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

struct App {
    config: ChronosConfig,
    db_path: PathBuf,
    store: Arc<dyn JobStore>,
    service: Arc<JobService>,
}

impl App {
    fn open(config_path: Option<PathBuf>, db: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => chronos_config::load_config_from(&path)?,
            None => chronos_config::load_config()?,
        };
        let db_path = match db {
            Some(path) => path,
            None => config.db_path()?,
        };
        chronos_config::ensure_db_dir(&db_path)
            .with_context(|| format!("creating directory for {}", db_path.display()))?;

        let store: Arc<dyn JobStore> = Arc::new(
            SqliteJobStore::open(&db_path)
                .with_context(|| format!("opening {}", db_path.display()))?,
        );
        let service = Arc::new(JobService::from_config(
            store.clone(),
            Arc::new(CommandExecutor::new()),
            &config,
        ));
        Ok(Self {
            config,
            db_path,
            store,
            service,
        })
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let app = App::open(cli.config, cli.db)?;
    let service = &app.service;

    match cli.command {
        Commands::Run { tick_secs, workers } => {
            let mut sched_config = app.config.scheduler.clone();
            if let Some(secs) = tick_secs {
                sched_config.tick_interval_secs = secs;
            }
            if let Some(n) = workers {
                sched_config.workers = n;
            }
            let scheduler = Arc::new(Scheduler::from_config(
                app.store.clone(),
                app.service.clone(),
                &sched_config,
            ));

            let cancel = CancellationToken::new();
            let handle = tokio::spawn(scheduler.run(cancel.clone()));
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl-C, stopping scheduler");
            cancel.cancel();
            handle.await?;
        }
        Commands::Create { job } => print_json(&service.create(job.into()).await?)?,
        Commands::List { status } => {
            let jobs = match status {
                Some(status) => service.list_by_status(status).await?,
                None => service.list().await?,
            };
            print_json(&jobs)?;
        }
        Commands::Get { id } => print_json(&service.get(&id).await?)?,
        Commands::Update { id, job } => print_json(&service.update(&id, job.into()).await?)?,
        Commands::Delete { id } => {
            service.delete(&id).await?;
            print_json(&serde_json::json!({ "deleted": id }))?;
        }
        Commands::Execute { id } => print_json(&service.execute(&id).await?)?,
        Commands::Rerun { id, at } => print_json(&service.rerun(&id, at).await?)?,
        Commands::Cancel { id } => print_json(&service.cancel(&id).await?)?,
        Commands::Reschedule { id, at, cron } => {
            let request = RescheduleRequest {
                new_schedule_time: at,
                new_cron_expression: cron,
            };
            print_json(&service.reschedule(&id, request).await?)?;
        }
        Commands::Pause { id } => print_json(&service.pause(&id).await?)?,
        Commands::Resume { id } => print_json(&service.resume(&id).await?)?,
        Commands::Health => print_health(&app),
    }

    Ok(())
}

fn print_health(app: &App) {
    let config = &app.config;
    println!("chronos is healthy");
    println!("  database: {}", app.db_path.display());
    println!(
        "  tick interval: {:?}",
        Duration::from_secs(config.scheduler.tick_interval_secs)
    );
    println!("  workers: {}", config.scheduler.workers);
    println!("  default delay: {}s", config.scheduler.default_delay_secs);
    println!(
        "  retries: {} (backoff base {}s)",
        app.service.retry_policy().max_retries(),
        config.retry.backoff_base
    );
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}
