//! devgraph-worker: runs the pipeline stage workers against PostgreSQL.
//!
//! Each selected stage gets its own queue worker. The process ends on
//! Ctrl-C, when every worker stopped on its own (budget, idle, fatal error),
//! and exits non-zero if any worker stopped on a fatal error.

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use devgraph_core::WorkspaceId;
use devgraph_db::{log_pool_metrics, Database, PoolConfig};
use devgraph_inference::OpenAIBackend;
use devgraph_jobs::{
    CodeIngestionHandler, MemoryIngestionHandler, PatternConfig, PatternDetectionHandler,
    QueueWorker, RelationshipConfig, StopReason, Stores, SummarizationConfig,
    SummarizationHandler, WorkerBuilder, WorkerConfig, WorkerHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stage {
    /// Drain `memory_ingestion`
    Memory,
    /// Drain `code_ingestion`
    Code,
    /// Drain `entity_summarization`
    Summarize,
    /// Drain `pattern_detection`
    Detect,
}

#[derive(Parser)]
#[command(name = "devgraph-worker")]
#[command(author, version, about = "Pipeline workers for devgraph")]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost/devgraph")]
    database_url: String,

    /// Stages to run (comma separated)
    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_value = "memory,code,summarize,detect"
    )]
    stages: Vec<Stage>,

    /// Wall-clock budget per worker, in seconds
    #[arg(long, env = "WORKER_BUDGET_SECS")]
    budget: Option<u64>,

    /// Stop each worker once its queue is empty
    #[arg(long)]
    once: bool,

    /// Restrict pattern detection to one workspace (e.g. `user:<uuid>`)
    #[arg(long, env = "DEVGRAPH_WORKSPACE")]
    workspace: Option<String>,

    /// Minimum seconds between detection runs of one workspace
    #[arg(long, env = "DETECTION_MIN_INTERVAL_SECS", default_value_t = 3600)]
    min_interval: u64,

    /// Run database migrations before starting
    #[arg(long)]
    migrate: bool,
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables daily-rotated file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors
///   RUST_LOG    - standard env filter
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "devgraph_worker=info,devgraph_jobs=info,devgraph_db=info,devgraph_inference=info".into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("devgraph-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

fn build_worker(
    stage: Stage,
    stores: &Stores,
    config: WorkerConfig,
    cli: &Cli,
    workspace: Option<WorkspaceId>,
) -> anyhow::Result<QueueWorker> {
    let builder = WorkerBuilder::new(stores.clone()).with_config(config);
    let worker = match stage {
        Stage::Memory => builder
            .with_handler(MemoryIngestionHandler::new(stores.clone()))
            .build()?,
        Stage::Code => builder
            .with_handler(CodeIngestionHandler::new(stores.clone()))
            .build()?,
        Stage::Summarize => {
            let backend = OpenAIBackend::from_env().context("embedding backend")?;
            let handler =
                SummarizationHandler::new(stores.clone(), backend, SummarizationConfig::from_env())
                    .context("summarization handler")?;
            builder.with_handler(handler).build()?
        }
        Stage::Detect => {
            let handler = PatternDetectionHandler::new(
                stores.clone(),
                PatternConfig::from_env(),
                RelationshipConfig::from_env(),
            )
            .with_min_interval(Duration::from_secs(cli.min_interval))
            .with_workspace_filter(workspace);
            builder.with_handler(handler).build()?
        }
    };
    Ok(worker)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();
    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .as_deref()
        .map(str::parse::<WorkspaceId>)
        .transpose()
        .context("invalid --workspace")?;

    let mut config = WorkerConfig::from_env().with_stop_when_idle(cli.once);
    if let Some(secs) = cli.budget {
        config = config.with_budget(Some(Duration::from_secs(secs)));
    }

    let db = Database::connect_with_config(&cli.database_url, PoolConfig::from_env())
        .await
        .context("database connection")?;
    log_pool_metrics(&db.pool);
    if cli.migrate {
        info!("Running migrations");
        db.migrate().await.context("migrations")?;
    }
    let stores = Stores::from_database(&db);

    let mut handles: Vec<(Stage, WorkerHandle)> = Vec::with_capacity(cli.stages.len());
    for &stage in &cli.stages {
        let worker = build_worker(stage, &stores, config.clone(), &cli, workspace)?;
        info!(stage = ?stage, "Starting worker");
        handles.push((stage, worker.start()));
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received, stopping workers");
                for (stage, handle) in &handles {
                    // A worker that already stopped has dropped its receiver.
                    if handle.shutdown().await.is_err() {
                        debug!(stage = ?stage, "Worker already stopped");
                    }
                }
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                if handles.iter().all(|(_, h)| h.is_finished()) {
                    break;
                }
            }
        }
    }

    let mut fatal = Vec::new();
    for (stage, handle) in handles {
        match handle.join().await {
            Ok(reason) => {
                info!(stage = ?stage, reason = ?reason, "Worker stopped");
                if reason == StopReason::Fatal {
                    fatal.push(stage);
                }
            }
            Err(e) => {
                error!(stage = ?stage, error = %e, "Worker task failed");
                fatal.push(stage);
            }
        }
    }

    db.close().await;
    if !fatal.is_empty() {
        anyhow::bail!("workers stopped on fatal errors: {:?}", fatal);
    }
    info!("All workers stopped");
    Ok(())
}
