//! CLI command definitions and dispatch.

pub mod jobs;
pub mod migrate;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use claimcheck_core::config::AppConfig;
use claimcheck_core::error::AppError;
use claimcheck_database::DatabasePool;
use claimcheck_worker::JobQueue;

/// ClaimCheck — background job queue administration
#[derive(Debug, Parser)]
#[command(name = "claimcheck-cli", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Database migration management
    Migrate(migrate::MigrateArgs),
    /// Job queue inspection and operations
    Jobs(jobs::JobsArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        match &self.command {
            Commands::Migrate(args) => migrate::execute(args, &self.config).await,
            Commands::Jobs(args) => jobs::execute(args, &self.config, self.format).await,
        }
    }
}

/// Helper: load configuration from file
pub fn load_config(config_path: &str) -> Result<AppConfig, AppError> {
    AppConfig::load(config_path)
}

/// Helper: connect to the database without touching the schema
pub async fn connect(config: &AppConfig) -> Result<DatabasePool, AppError> {
    DatabasePool::connect(&config.database).await
}

/// Helper: build a job queue over PostgreSQL
pub async fn open_queue(config: &AppConfig) -> Result<JobQueue, AppError> {
    let db = connect(config).await?;
    Ok(JobQueue::new(db.job_store(), config.queue.clone()))
}
