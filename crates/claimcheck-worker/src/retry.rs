//! Retry backoff and failure message normalization.

use rand::Rng;

use claimcheck_core::config::BackoffConfig;

/// Jittered linear backoff.
///
/// The base delay is the caller's explicit value, or `attempts *
/// seconds_per_attempt`, clamped to `[min, max]`. A uniform jitter of
/// `±jitter` is applied to the base and the result is clamped again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    min_seconds: i64,
    max_seconds: i64,
    seconds_per_attempt: i64,
    jitter: f64,
}

impl BackoffPolicy {
    /// Build a policy, repairing inconsistent settings instead of rejecting them.
    pub fn from_config(config: &BackoffConfig) -> Self {
        let min_seconds = config.min_seconds.max(0);
        let max_seconds = config.max_seconds.max(min_seconds);
        let jitter = if config.jitter.is_finite() {
            config.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            min_seconds,
            max_seconds,
            seconds_per_attempt: config.seconds_per_attempt.max(0),
            jitter,
        }
    }

    /// Clamped delay before jitter.
    pub fn base_delay(&self, attempts: i32, explicit_seconds: Option<i64>) -> i64 {
        let base = explicit_seconds
            .unwrap_or_else(|| i64::from(attempts.max(0)).saturating_mul(self.seconds_per_attempt));
        base.clamp(self.min_seconds, self.max_seconds)
    }

    /// Jittered delay drawn from `rng`.
    pub fn delay_with<R: Rng + ?Sized>(
        &self,
        attempts: i32,
        explicit_seconds: Option<i64>,
        rng: &mut R,
    ) -> i64 {
        let base = self.base_delay(attempts, explicit_seconds) as f64;
        let factor = rng.random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        let jittered = (base * factor).round() as i64;
        jittered.clamp(self.min_seconds, self.max_seconds)
    }

    /// Jittered delay drawn from the thread-local generator.
    pub fn delay(&self, attempts: i32, explicit_seconds: Option<i64>) -> i64 {
        self.delay_with(attempts, explicit_seconds, &mut rand::rng())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

/// Trim a failure message and cut it to at most `max_chars` characters.
///
/// Blank messages become `None`.
pub fn truncate_error(message: &str, max_chars: usize) -> Option<String> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => Some(trimmed[..cut].to_string()),
        None => Some(trimmed.to_string()),
    }
}
