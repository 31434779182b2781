//! Job queue configuration.

use serde::{Deserialize, Serialize};

/// Fallback used when no (or an unparsable) max-attempts value is configured.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Settings injected into the job queue at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Attempts allowed before a job is permanently failed, when the
    /// producer does not specify one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Failure messages are truncated to this many characters.
    #[serde(default = "default_error_max_chars")]
    pub error_max_chars: usize,
    /// Upper bound for `limit` on admin listings.
    #[serde(default = "default_admin_max_limit")]
    pub admin_max_limit: i64,
    /// Retry backoff settings.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// Jittered linear backoff applied when a job fails with attempts left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Lower clamp for the delay, in seconds.
    #[serde(default = "default_min_seconds")]
    pub min_seconds: i64,
    /// Upper clamp for the delay, in seconds.
    #[serde(default = "default_max_seconds")]
    pub max_seconds: i64,
    /// Base delay contributed by each attempt so far.
    #[serde(default = "default_seconds_per_attempt")]
    pub seconds_per_attempt: i64,
    /// Uniform jitter fraction applied around the base (0.2 = ±20%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            error_max_chars: default_error_max_chars(),
            admin_max_limit: default_admin_max_limit(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_seconds: default_min_seconds(),
            max_seconds: default_max_seconds(),
            seconds_per_attempt: default_seconds_per_attempt(),
            jitter: default_jitter(),
        }
    }
}

/// Parse a raw max-attempts value the way the legacy
/// `JOB_QUEUE_MAX_ATTEMPTS` variable was interpreted: unparsable values fall
/// back to [`DEFAULT_MAX_ATTEMPTS`] and anything below 1 becomes 1.
pub fn parse_max_attempts(raw: &str) -> i32 {
    match raw.trim().parse::<i32>() {
        Ok(value) => value.max(1),
        Err(_) => {
            tracing::debug!(value = raw, "Invalid max attempts value; using default");
            DEFAULT_MAX_ATTEMPTS
        }
    }
}

fn default_max_attempts() -> i32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_error_max_chars() -> usize {
    2000
}

fn default_admin_max_limit() -> i64 {
    500
}

fn default_min_seconds() -> i64 {
    30
}

fn default_max_seconds() -> i64 {
    3600
}

fn default_seconds_per_attempt() -> i64 {
    60
}

fn default_jitter() -> f64 {
    0.2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_max_attempts() {
        assert_eq!(parse_max_attempts("5"), 5);
        assert_eq!(parse_max_attempts(" 7 "), 7);
        assert_eq!(parse_max_attempts("0"), 1);
        assert_eq!(parse_max_attempts("-4"), 1);
        assert_eq!(parse_max_attempts("lots"), DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.error_max_chars, 2000);
        assert_eq!(config.backoff.min_seconds, 30);
        assert_eq!(config.backoff.max_seconds, 3600);
    }
}
