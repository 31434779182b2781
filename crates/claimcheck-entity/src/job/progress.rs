//! Progress snapshots written into `jobs.result` while a job runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Partial-completion report for a running job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Total number of chunks (never negative).
    pub total_chunks: i64,
    /// Chunks completed so far, clamped into `[0, total_chunks]` when a total is known.
    pub completed_chunks: i64,
    /// Chunk currently being processed.
    pub current_chunk: Option<i64>,
    /// `completed / total` in `[0, 1]`, rounded to 4 places; 0 without a total.
    pub percent_complete: f64,
    /// When the snapshot was taken.
    pub updated_at: DateTime<Utc>,
    /// Optional human-readable note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressSnapshot {
    /// Build a normalized snapshot.
    pub fn new(
        total_chunks: i64,
        completed_chunks: i64,
        current_chunk: Option<i64>,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        let total = total_chunks.max(0);
        let completed = if total > 0 {
            completed_chunks.clamp(0, total)
        } else {
            completed_chunks.max(0)
        };

        let percent = if total > 0 {
            (completed as f64 / total as f64).min(1.0)
        } else {
            0.0
        };

        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);

        Self {
            total_chunks: total,
            completed_chunks: completed,
            current_chunk,
            percent_complete: (percent * 10_000.0).round() / 10_000.0,
            updated_at: now,
            message,
        }
    }

    /// Serialize the snapshot into the JSON stored in `result`.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_total_is_zero_percent() {
        let snapshot = ProgressSnapshot::new(0, 0, None, None, Utc::now());
        assert_eq!(snapshot.percent_complete, 0.0);
        assert_eq!(snapshot.total_chunks, 0);
    }

    #[test]
    fn test_completed_is_clamped_to_total() {
        let snapshot = ProgressSnapshot::new(4, 9, Some(4), None, Utc::now());
        assert_eq!(snapshot.completed_chunks, 4);
        assert_eq!(snapshot.percent_complete, 1.0);

        let negative = ProgressSnapshot::new(4, -2, None, None, Utc::now());
        assert_eq!(negative.completed_chunks, 0);
        assert_eq!(negative.percent_complete, 0.0);
    }

    #[test]
    fn test_percent_is_rounded() {
        let snapshot = ProgressSnapshot::new(3, 1, Some(2), None, Utc::now());
        assert_eq!(snapshot.percent_complete, 0.3333);
    }

    #[test]
    fn test_blank_message_is_omitted() {
        let snapshot = ProgressSnapshot::new(2, 1, None, Some("   "), Utc::now());
        let value = snapshot.to_value();
        assert!(value.get("message").is_none());
        assert_eq!(value["current_chunk"], serde_json::Value::Null);

        let noted = ProgressSnapshot::new(2, 1, None, Some(" chunk 1 done "), Utc::now());
        assert_eq!(noted.to_value()["message"], "chunk 1 done");
    }
}
