//! Job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use claimcheck_core::types::JobId;

use super::status::JobStatus;

/// A background job: one row of the `jobs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Unique job identifier, assigned in insertion order.
    pub id: JobId,
    /// Job type label interpreted by workers (e.g. `"summarize"`).
    pub job_type: String,
    /// Job-specific payload (JSON), opaque to the queue.
    pub payload: serde_json::Value,
    /// Current job status.
    pub status: JobStatus,
    /// Higher priorities are claimed first.
    pub priority: i32,
    /// Earliest time the job may be claimed.
    pub run_at: DateTime<Utc>,
    /// Number of times the job has been claimed.
    pub attempts: i32,
    /// Claims allowed before the job fails permanently.
    pub max_attempts: i32,
    /// Most recent (truncated) failure message.
    pub last_error: Option<String>,
    /// Final result or latest progress snapshot.
    pub result: Option<serde_json::Value>,
    /// Deduplication fingerprint, set only for deduplicated enqueues.
    pub fingerprint: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
    /// When the current (or last) attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Check whether the current attempt is the last one allowed.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Check whether a worker may claim the job at `now`.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued && self.run_at <= now
    }
}

/// Data required to insert a new job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    /// Job type identifier (already trimmed and validated).
    pub job_type: String,
    /// Job-specific payload.
    pub payload: serde_json::Value,
    /// Priority, `>= 0`.
    pub priority: i32,
    /// Earliest claim time.
    pub run_at: DateTime<Utc>,
    /// Maximum attempts, `>= 1`.
    pub max_attempts: i32,
    /// Fingerprint when the enqueue is deduplicated.
    pub fingerprint: Option<String>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
}

impl NewJob {
    /// Materialize the row a store would persist for this job.
    pub fn into_job(self, id: JobId) -> Job {
        Job {
            id,
            job_type: self.job_type,
            payload: self.payload,
            status: JobStatus::Queued,
            priority: self.priority,
            run_at: self.run_at,
            attempts: 0,
            max_attempts: self.max_attempts,
            last_error: None,
            result: None,
            fingerprint: self.fingerprint,
            created_at: self.created_at,
            updated_at: self.created_at,
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_job(run_at: DateTime<Utc>) -> NewJob {
        NewJob {
            job_type: "summarize".to_string(),
            payload: serde_json::json!({"episode_id": 1}),
            priority: 5,
            run_at,
            max_attempts: 3,
            fingerprint: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_into_job_starts_queued() {
        let now = Utc::now();
        let job = new_job(now).into_job(JobId(1));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert!(job.last_error.is_none());
        assert!(job.is_claimable_at(now));
    }

    #[test]
    fn test_future_job_not_claimable() {
        let now = Utc::now();
        let job = new_job(now + Duration::minutes(5)).into_job(JobId(1));
        assert!(!job.is_claimable_at(now));
    }

    #[test]
    fn test_attempts_exhausted() {
        let mut job = new_job(Utc::now()).into_job(JobId(1));
        job.attempts = 2;
        assert!(!job.attempts_exhausted());
        job.attempts = 3;
        assert!(job.attempts_exhausted());
    }
}
