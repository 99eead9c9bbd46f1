//! kraned — the Krane daemon.
//!
//! Single-node control plane: opens the store, connects to the local
//! Docker engine, ensures the shared bridge network, starts the job
//! workers, and serves the REST API until interrupted. Shutdown drains
//! the queue: no new jobs are accepted, in-flight jobs finish or abort,
//! queued jobs terminate as cancelled.
//!
//! # Usage
//!
//! ```text
//! kraned --listen-address 0.0.0.0:8500 --db-path /var/lib/krane/krane.redb
//! ```
//!
//! Every flag can also come from the environment (`LISTEN_ADDRESS`,
//! `DB_PATH`, `KRANE_DEPLOYMENT_RETRY_POLICY`, `KRANE_WORKERS`);
//! `KRANE_LOG_LEVEL` controls log verbosity.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use krane_core::{JobQueue, Reconciler, WorkerPool, KRANE_NETWORK};
use krane_runtime::{DockerRuntime, Runtime};
use krane_store::{DiskStore, Store};

#[derive(Parser)]
#[command(name = "kraned", about = "Krane deployment daemon")]
struct Cli {
    /// Address the REST API listens on.
    #[arg(long, env = "LISTEN_ADDRESS", default_value = "0.0.0.0:8500")]
    listen_address: String,

    /// Store file location.
    #[arg(long, env = "DB_PATH", default_value = "/var/lib/krane/krane.redb")]
    db_path: PathBuf,

    /// Default run attempts per job, including the first.
    #[arg(long, env = "KRANE_DEPLOYMENT_RETRY_POLICY", default_value = "1")]
    retry_policy: u32,

    /// Number of job workers.
    #[arg(long, env = "KRANE_WORKERS", default_value = "1")]
    workers: usize,

    /// Job queue capacity.
    #[arg(long, default_value_t = krane_core::queue::DEFAULT_CAPACITY)]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("KRANE_LOG_LEVEL")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| "info".parse().unwrap());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    info!("krane daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    if let Some(parent) = cli.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store: Arc<dyn Store> = Arc::new(DiskStore::open(&cli.db_path)?);
    info!(path = ?cli.db_path, "store opened");

    let runtime: Arc<dyn Runtime> = Arc::new(DockerRuntime::connect()?);
    let network_id = runtime.ensure_network(KRANE_NETWORK).await?;
    info!(network = KRANE_NETWORK, id = %network_id, "bridge network ready");

    let queue = Arc::new(JobQueue::new(cli.queue_capacity));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        runtime.clone(),
        queue.clone(),
        cli.retry_policy,
    ));

    // ── Shutdown signal and workers ────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = WorkerPool::spawn(
        cli.workers,
        queue.clone(),
        reconciler.clone(),
        store.clone(),
        shutdown_rx,
    );
    info!(workers = cli.workers, capacity = cli.queue_capacity, "job workers started");

    // ── Start API server ───────────────────────────────────────

    let router = krane_api::build_router(store, reconciler);
    let listener = tokio::net::TcpListener::bind(&cli.listen_address).await?;
    info!(addr = %cli.listen_address, "API server starting");

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    pool.drain().await;
    info!("krane daemon stopped");
    Ok(())
}
