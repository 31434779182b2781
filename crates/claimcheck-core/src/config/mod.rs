//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod database;
pub mod logging;
pub mod queue;
pub mod worker;

use serde::{Deserialize, Serialize};

pub use self::database::DatabaseConfig;
pub use self::logging::LoggingConfig;
pub use self::queue::{BackoffConfig, QueueConfig};
pub use self::worker::WorkerConfig;

use crate::error::AppError;

/// Legacy environment variable overriding `queue.max_attempts`.
pub const MAX_ATTEMPTS_ENV: &str = "JOB_QUEUE_MAX_ATTEMPTS";

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (base file + environment overlay) and
/// `CLAIMCHECK__*` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database connection settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Job queue settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Worker process settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the file at `path` with an environment-specific overlay
    /// (`config/{CLAIMCHECK_ENV}`), environment variables prefixed with
    /// `CLAIMCHECK__`, and finally the legacy `JOB_QUEUE_MAX_ATTEMPTS`.
    pub fn load(path: &str) -> Result<Self, AppError> {
        let env = std::env::var("CLAIMCHECK_ENV").unwrap_or_else(|_| "development".to_string());
        let legacy_max_attempts = std::env::var(MAX_ATTEMPTS_ENV)
            .ok()
            .map(|raw| i64::from(queue::parse_max_attempts(&raw)));

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("CLAIMCHECK")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("queue.max_attempts", legacy_max_attempts)?
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let mut loaded: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        loaded.queue.max_attempts = loaded.queue.max_attempts.max(1);
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let config = AppConfig::load("does/not/exist").expect("defaults should load");
        assert_eq!(config.worker.poll_interval_seconds, 5);
        assert!(config.worker.job_types.is_empty());
        assert_eq!(config.logging.level, "info");
        assert!(config.queue.max_attempts >= 1);
    }
}
