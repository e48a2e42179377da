//! gridqd: the gridq daemon.
//!
//! Single binary that assembles all gridq subsystems:
//! - State store (redb)
//! - Durable trigger queue
//! - Scheduling worker
//! - Queue re-scan
//! - REST API
//!
//! # Usage
//!
//! ```text
//! gridqd serve --port 8080 --data-dir /var/lib/gridq --config /etc/gridq.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use gridq_api::ApiState;
use gridq_queue::{Connector, DurableBroker};
use gridq_scheduler::{
    LifecycleManager, QueueRescanner, SchedulerConfig, SchedulingWorker, SubmissionGateway,
    TriggerPublisher,
};
use gridq_state::StateStore;

const DEFAULT_LOG_FILTER: &str = "info,gridqd=debug,gridq=debug";

#[derive(Parser)]
#[command(name = "gridqd", about = "gridq deployment scheduler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the API and run the scheduling worker in one process.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/gridq")]
        data_dir: PathBuf,

        /// Scheduler config file (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            config,
            log_json,
        } => {
            init_tracing(log_json);
            let config = load_config(config.as_deref())?;
            serve(port, data_dir, config).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<SchedulerConfig> {
    let config = match path {
        Some(path) => SchedulerConfig::from_file(path)?,
        None => SchedulerConfig::default(),
    };
    config.with_env_overrides()
}

async fn serve(port: u16, data_dir: PathBuf, config: SchedulerConfig) -> anyhow::Result<()> {
    info!("gridq daemon starting");

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    let db_path = data_dir.join("gridq.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let connector: Arc<dyn Connector> =
        Arc::new(DurableBroker::with_prefetch(store.clone(), config.queue.prefetch));
    let publisher = Arc::new(TriggerPublisher::new(connector.clone()));
    info!(prefetch = config.queue.prefetch, "trigger queue initialized");

    let gateway = Arc::new(SubmissionGateway::new(store.clone(), publisher.clone()));
    let lifecycle = Arc::new(LifecycleManager::new(store.clone(), publisher.clone()));
    let worker = SchedulingWorker::new(store.clone(), connector, &config);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let worker_shutdown = shutdown_rx.clone();
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run(worker_shutdown).await {
            error!(error = %e, "scheduling worker stopped; deployments will stay queued");
        }
    });

    let rescan_handle = match config.rescan_interval() {
        Some(interval) => {
            let rescanner = QueueRescanner::new(store.clone(), publisher, interval);
            let rescan_shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                rescanner.run(rescan_shutdown).await;
            }))
        }
        None => {
            info!("queue re-scan disabled");
            None
        }
    };

    // ── Start API server ───────────────────────────────────────

    let router = gridq_api::build_router(ApiState {
        store,
        gateway,
        lifecycle,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c; shutting down");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = worker_handle.await;
    if let Some(handle) = rescan_handle {
        let _ = handle.await;
    }

    info!("gridq daemon stopped");
    Ok(())
}
