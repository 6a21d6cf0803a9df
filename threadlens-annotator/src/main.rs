//! threadlens-annotator - Main entry point
//!
//! Runs one incremental annotation pass per invocation; meant to be scheduled.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use threadlens_annotator::config::{AnnotatorConfig, CliOverrides};
use threadlens_annotator::oracle::{GeminiClient, OracleClient, TokioSleeper};
use threadlens_annotator::pipeline::{self, Orchestrator, PipelineContext, RunReport};
use threadlens_annotator::store::{AnnotationStore, SqliteAnnotationStore};
use threadlens_annotator::tasks::{AnnotationTask, SentimentTask, StatusExplainTask};
use threadlens_annotator::PipelineError;
use threadlens_common::db::init_database;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "threadlens_annotator=info,threadlens_common=info";

/// Command-line arguments for threadlens-annotator
#[derive(Parser, Debug)]
#[command(name = "threadlens-annotator")]
#[command(about = "Incremental LLM annotation of customer-interaction threads")]
#[command(version)]
struct Args {
    /// Config file (default: $THREADLENS_CONFIG or <config_dir>/threadlens/annotator.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database holding source events and annotations
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Score customer sentiment of the latest message of each thread
    Sentiment(RunArgs),
    /// Explain thread status and next action owner
    Explain(RunArgs),
    /// Run sentiment, then explain
    All(RunArgs),
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct RunArgs {
    /// Maximum items to annotate in this run
    #[arg(short, long)]
    batch_limit: Option<usize>,

    /// Provision and list pending items without calling the oracle
    #[arg(long)]
    dry_run: bool,
}

impl Command {
    fn run_args(&self) -> RunArgs {
        match self {
            Command::Sentiment(a) | Command::Explain(a) | Command::All(a) => *a,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let run_args = args.command.run_args();

    let config = AnnotatorConfig::load(&CliOverrides {
        config_path: args.config.clone(),
        database_path: args.database.clone(),
        batch_limit: run_args.batch_limit,
    })
    .context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    let default_filter = config.log_level.clone().unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting threadlens-annotator v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database_path().display());

    let pool = init_database(config.database_path())
        .await
        .context("Failed to open database")?;

    let store: Arc<dyn AnnotationStore> = Arc::new(SqliteAnnotationStore::new(pool.clone()));

    let runner = if run_args.dry_run {
        Runner::Preview(store)
    } else {
        let oracle = GeminiClient::new(
            config.oracle.endpoint.clone(),
            config.oracle.model.clone(),
            config.require_api_key()?,
            config.oracle.request_timeout,
        )
        .context("Failed to build oracle client")?;

        Runner::Annotate(Orchestrator::new(PipelineContext {
            store,
            oracle: OracleClient::new(Arc::new(oracle), config.retry, Arc::new(TokioSleeper)),
        }))
    };

    let sentiment = SentimentTask::new(config.sentiment.contract_version.clone());
    let explain = StatusExplainTask::new(config.explain.contract_version.clone());

    let mut failed = false;
    if matches!(args.command, Command::Sentiment(_) | Command::All(_)) {
        failed |= !runner.execute(&sentiment, config.sentiment.batch_limit).await;
    }
    if matches!(args.command, Command::Explain(_) | Command::All(_)) {
        failed |= !runner.execute(&explain, config.explain.batch_limit).await;
    }

    pool.close().await;

    if failed {
        bail!("Annotation run failed");
    }
    Ok(())
}

enum Runner {
    /// `--dry-run`: provision and select only
    Preview(Arc<dyn AnnotationStore>),
    Annotate(Orchestrator),
}

impl Runner {
    /// Run (or preview) one task; false when the run failed
    async fn execute<T: AnnotationTask>(&self, task: &T, batch_limit: NonZeroUsize) -> bool {
        let orchestrator = match self {
            Runner::Preview(store) => {
                return match pipeline::preview(store.as_ref(), task, batch_limit).await {
                    Ok(keys) => {
                        info!("[dry run] {}: {} item(s) would be annotated", task.kind(), keys.len());
                        true
                    }
                    Err(e) => {
                        error!("{} preview failed: {}", task.kind(), e);
                        false
                    }
                };
            }
            Runner::Annotate(orchestrator) => orchestrator,
        };

        match orchestrator.run(task, batch_limit).await {
            Ok(report) => {
                log_report(&report);
                true
            }
            Err(PipelineError::Write(failure)) => {
                log_report(&failure.report);
                for rejection in &failure.report.rejected {
                    error!(natural_key = %rejection.key, "Rejected: {}", rejection.reason);
                }
                error!("{} run failed: {}", task.kind(), failure);
                false
            }
            Err(e) => {
                error!("{} run failed: {}", task.kind(), e);
                false
            }
        }
    }
}

fn log_report(report: &RunReport) {
    info!(
        run_id = %report.run_id,
        task = %report.task,
        contract_version = %report.contract_version,
        selected = report.selected,
        written = report.written.len(),
        failed = report.failed.len(),
        rejected = report.rejected.len(),
        "Run complete"
    );
    for failure in &report.failed {
        warn!(
            natural_key = %failure.key,
            "Not annotated this run: {}",
            failure.cause
        );
    }
}
