//! The storage contract the job queue is written against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use claimcheck_core::result::AppResult;
use claimcheck_core::types::JobId;
use claimcheck_entity::job::{Job, JobFilter, NewJob, QueueStats};

/// Result of a deduplicated insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted(Job),
    /// An active job already held the fingerprint.
    Existing(Job),
}

impl InsertOutcome {
    /// The job either inserted or reused.
    pub fn job(&self) -> &Job {
        match self {
            Self::Inserted(job) | Self::Existing(job) => job,
        }
    }

    /// Consume the outcome, returning the job.
    pub fn into_job(self) -> Job {
        match self {
            Self::Inserted(job) | Self::Existing(job) => job,
        }
    }

    /// Whether an existing job was reused.
    pub fn is_existing(&self) -> bool {
        matches!(self, Self::Existing(_))
    }
}

/// Persistence for the job table.
///
/// Every state transition is guarded by the status it expects to find
/// (`running` for done/failed/requeue/progress, `failed` for reset); the
/// returned `bool` reports whether a row actually transitioned. All
/// timestamps are supplied by the caller.
///
/// Transitions out of `running` also take an `attempt` guard. Each claim
/// increments `attempts`, so `Some(n)` only matches the claim that returned
/// `attempts = n`; a worker whose job was reaped and claimed again cannot
/// touch the new claim. `None` matches any running claim.
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug + 'static {
    /// Insert a queued job.
    async fn insert(&self, new: &NewJob) -> AppResult<Job>;

    /// Insert a queued job unless an active job holds the same fingerprint.
    /// Must be atomic with respect to concurrent callers.
    async fn insert_deduped(&self, new: &NewJob) -> AppResult<InsertOutcome>;

    /// Newest queued/running job carrying `fingerprint`.
    async fn find_active_by_fingerprint(&self, fingerprint: &str) -> AppResult<Option<Job>>;

    /// Newest job of any status with exactly this type and payload.
    async fn find_latest_by_payload(&self, job_type: &str, payload: &Value)
    -> AppResult<Option<Job>>;

    /// Atomically move the next due job to `running`, incrementing
    /// `attempts`. No two callers may ever receive the same job.
    async fn claim_next(
        &self,
        job_types: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Job>>;

    /// `running` -> `done`. `result = None` keeps the stored result.
    async fn mark_done(
        &self,
        id: JobId,
        attempt: Option<i32>,
        result: Option<&Value>,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// `running` -> `failed`.
    async fn mark_failed(
        &self,
        id: JobId,
        attempt: Option<i32>,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// `running` -> `queued` at `run_at`, keeping `message` as `last_error`.
    /// Only applies while the stored `attempts` is below `max_attempts`.
    async fn requeue(
        &self,
        id: JobId,
        attempt: Option<i32>,
        run_at: DateTime<Utc>,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Overwrite `result` of a `running` job.
    async fn write_result(
        &self,
        id: JobId,
        attempt: Option<i32>,
        result: &Value,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Filtered, ordered, windowed listing.
    async fn list(&self, filter: &JobFilter) -> AppResult<Vec<Job>>;

    /// Point lookup.
    async fn get(&self, id: JobId) -> AppResult<Option<Job>>;

    /// Number of jobs per status.
    async fn count_by_status(&self) -> AppResult<QueueStats>;

    /// `failed` -> `queued` with a fresh attempt budget.
    async fn reset_failed(&self, id: JobId, now: DateTime<Utc>) -> AppResult<Option<Job>>;

    /// `running` jobs whose current attempt started before `cutoff`.
    async fn running_started_before(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Job>>;
}
