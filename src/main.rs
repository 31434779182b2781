//! ClaimCheck worker process.
//!
//! Loads configuration, connects to PostgreSQL, brings the schema up to date
//! and runs the job poll loop until Ctrl-C.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

use claimcheck_core::config::AppConfig;
use claimcheck_core::error::AppError;
use claimcheck_database::DatabasePool;
use claimcheck_worker::{JobExecutor, JobQueue, WorkerRunner};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(e.kind.exit_code());
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Worker error");
        std::process::exit(e.kind.exit_code());
    }
}

/// Load configuration from file and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let config_path =
        std::env::var("CLAIMCHECK_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
    AppConfig::load(&config_path)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Worker run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting ClaimCheck worker");

    let db = DatabasePool::connect_and_migrate(&config.database).await?;
    let queue = Arc::new(JobQueue::new(db.job_store(), config.queue.clone()));

    // Job handlers live with the services that own each job type and are
    // registered here by the deployment that embeds them.
    let executor = Arc::new(JobExecutor::new());
    if executor.registered_types().is_empty() {
        tracing::warn!("No job handlers registered; claimed jobs will fail as unsupported");
    }

    let worker_id = format!("worker-{}", Uuid::new_v4().simple());
    let runner = WorkerRunner::new(queue, executor, config.worker.clone(), worker_id);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    runner.run(shutdown_rx).await;

    db.close().await;
    tracing::info!("ClaimCheck worker stopped");
    Ok(())
}
