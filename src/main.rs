//! ICOdaq - measurement session service for CAN sensor holders
//!
//! # Usage
//!
//! ```bash
//! # Run against the simulated holder with defaults
//! cargo run --release
//!
//! # Explicit config file and bind address
//! ./icodaq --config /etc/icodaq.toml --addr 0.0.0.0:33215
//! ```
//!
//! # Environment Variables
//!
//! - `ICODAQ_CONFIG`: Path to the TOML config file
//! - `ICODAQ_CORS_ORIGINS`: Comma-separated CORS allow-list
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use icodaq::acquisition::{Holder, SimulatedHolder};
use icodaq::api::create_app;
use icodaq::config::{self, DaqConfig};
use icodaq::pipeline::{AppContext, SessionSettings, WindowedRmsMetric};
use icodaq::sensors::SensorResolver;
use icodaq::storage::{disk_capacity, ColumnarStorageFactory, DataDirLock};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "icodaq")]
#[command(about = "ICOdaq measurement session service")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (overrides ICODAQ_CONFIG and ./icodaq.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the server address (default: "0.0.0.0:33215")
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the data directory for session files and the sensor catalogue
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "ICODAQ_LOG_JSON")]
    log_json: bool,
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
        }
    }
}

fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Wait for the remaining tasks to finish their graceful shutdown.
async fn drain_tasks(task_set: &mut JoinSet<Result<TaskName>>) {
    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => info!("🔒 Supervisor: Task {} stopped", task_name),
            Ok(Err(e)) => warn!("🔒 Supervisor: Task ended with error during shutdown: {}", e),
            Err(e) => warn!("🔒 Supervisor: Task panicked during shutdown: {}", e),
        }
    }
}

// ============================================================================
// Startup
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(args: &CliArgs) -> Result<DaqConfig> {
    let mut daq_config = match &args.config {
        Some(path) => DaqConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => DaqConfig::load(),
    };

    if let Some(addr) = &args.addr {
        daq_config.server.addr = addr.clone();
    }
    if let Some(dir) = &args.data_dir {
        daq_config.storage.data_dir = dir.clone();
    }
    daq_config.validate()?;
    Ok(daq_config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    config::init(load_config(&args)?);
    let daq_config = config::get();
    let data_dir = daq_config.storage.data_dir.clone();

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  ICOdaq - Measurement Session Service");
    info!("  CAN sensor holder acquisition and live streaming");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");

    let _lock = DataDirLock::acquire(&data_dir)?;
    let capacity = disk_capacity(&data_dir);
    info!(
        "💾 Data directory: {} ({:?} GB free of {:?} GB)",
        data_dir.display(),
        capacity.available,
        capacity.total
    );

    let holder: Arc<dyn Holder> = Arc::new(SimulatedHolder::new(&daq_config.holder));
    info!(
        "📡 Holder: {} (stream timeout {:.1}s)",
        holder.source_name(),
        daq_config.holder.stream_timeout_secs
    );

    let resolver = Arc::new(SensorResolver::new(daq_config.storage.catalogue_path()));
    let sensor_count = resolver.catalogue().await.sensors().len();
    info!(
        "📋 Sensor catalogue: {} sensors from {}",
        sensor_count,
        daq_config.storage.catalogue_path().display()
    );

    let storage = Arc::new(ColumnarStorageFactory::new(
        data_dir.clone(),
        daq_config.storage.chunk_rows,
    ));
    let ctx = AppContext::new(
        holder,
        resolver,
        storage,
        Arc::new(WindowedRmsMetric),
        SessionSettings::from_config(daq_config),
        data_dir,
    );

    let listener = tokio::net::TcpListener::bind(&daq_config.server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", daq_config.server.addr))?;
    info!("🌐 API listening on http://{}/api/v1", daq_config.server.addr);
    info!("");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(
        &mut task_set,
        listener,
        create_app(ctx.clone()),
        cancel_token.clone(),
    );

    let supervised = run_supervisor(&mut task_set, cancel_token).await;

    // Closing the session also closes its observer sockets, which lets the
    // HTTP server finish draining connections.
    if let Some(outcome) = ctx.registry.cancel_active().await {
        let report = outcome.report();
        info!(
            "⏹️  Active session '{}' cancelled after {} samples",
            report.name, report.samples
        );
    }
    drain_tasks(&mut task_set).await;

    supervised?;
    info!("");
    info!("✓ ICOdaq shutdown complete");
    Ok(())
}
