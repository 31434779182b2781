//! Background worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shortest idle sleep between polls.
pub const MIN_POLL_INTERVAL_SECONDS: u64 = 1;

/// Worker process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Interval in seconds to sleep when no job is claimable.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Job types this worker claims. Empty means every type.
    #[serde(default)]
    pub job_types: Vec<String>,
    /// Process at most one job and exit instead of looping.
    #[serde(default)]
    pub once: bool,
    /// Requeue `running` jobs older than this many seconds on each idle poll.
    /// Unset disables the reaper.
    #[serde(default)]
    pub stale_after_seconds: Option<u64>,
}

impl WorkerConfig {
    /// Idle sleep between polls, never shorter than
    /// [`MIN_POLL_INTERVAL_SECONDS`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(MIN_POLL_INTERVAL_SECONDS))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            job_types: Vec::new(),
            once: false,
            stale_after_seconds: None,
        }
    }
}

fn default_poll_interval() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_has_a_floor() {
        let config = WorkerConfig {
            poll_interval_seconds: 0,
            ..WorkerConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(WorkerConfig::default().poll_interval(), Duration::from_secs(5));
    }
}
