//! Job queue operations for producers, workers and operators.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing;

use claimcheck_core::config::QueueConfig;
use claimcheck_core::error::AppError;
use claimcheck_core::result::AppResult;
use claimcheck_core::traits::{Clock, SystemClock};
use claimcheck_core::types::{JobId, PageWindow};
use claimcheck_database::store::{InsertOutcome, JobStore};
use claimcheck_entity::job::{
    Job, JobFilter, JobOrder, JobStatus, NewJob, ProgressSnapshot, QueueStats,
};

use crate::fingerprint::fingerprint_value;
use crate::retry::{BackoffPolicy, truncate_error};

/// Optional settings for [`JobQueue::enqueue`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Higher values are claimed first. Must not be negative.
    #[serde(default)]
    pub priority: i32,
    /// Earliest claim time; defaults to now.
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    /// Attempt budget; unset or non-positive uses the configured default.
    #[serde(default)]
    pub max_attempts: Option<i32>,
    /// Reuse an active job with the same type and payload instead of inserting.
    #[serde(default)]
    pub dedupe: bool,
}

/// One entry of a batch enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Job type label.
    pub job_type: String,
    /// JSON object payload.
    pub payload: Value,
}

impl JobSpec {
    /// Create a new spec.
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
        }
    }
}

/// A batch entry that was not enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedJob {
    /// Job type as submitted.
    pub job_type: String,
    /// Payload as submitted.
    pub payload: Value,
    /// Why the entry was rejected.
    pub reason: String,
}

/// Outcome of [`JobQueue::enqueue_batch`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnqueueReport {
    /// Newly inserted jobs.
    pub accepted: Vec<Job>,
    /// Active jobs returned instead of inserting duplicates.
    pub reused: Vec<Job>,
    /// Entries that failed validation.
    pub rejected: Vec<RejectedJob>,
}

/// What [`JobQueue::fail`] did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Requeued with a backoff delay.
    Retrying {
        /// When the job becomes claimable again.
        run_at: DateTime<Utc>,
        /// Delay applied, in seconds.
        delay_secs: i64,
    },
    /// Moved to the terminal `failed` state.
    Failed,
    /// The job was no longer `running`; nothing was written.
    Skipped,
}

/// String-typed listing parameters, as received from an operator surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    /// Status name, case-insensitive.
    #[serde(default)]
    pub status: Option<String>,
    /// Exact job type.
    #[serde(default)]
    pub job_type: Option<String>,
    /// Maximum rows.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Rows to skip.
    #[serde(default)]
    pub offset: i64,
    /// Row ordering.
    #[serde(default)]
    pub order: JobOrder,
}

impl ListQuery {
    /// Parse and validate into a [`JobFilter`].
    pub fn into_filter(self, max_limit: i64) -> AppResult<JobFilter> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<JobStatus>().map_err(AppError::validation)?),
        };
        let job_type = match self.job_type {
            None => None,
            Some(raw) if raw.trim().is_empty() => {
                return Err(AppError::validation("job_type filter must not be blank"));
            }
            Some(raw) => Some(raw.trim().to_string()),
        };
        Ok(JobFilter {
            status,
            job_type,
            window: PageWindow::new(self.limit, self.offset).validated(max_limit)?,
            order: self.order,
        })
    }
}

/// The persisted job queue.
///
/// All timestamps come from the injected [`Clock`]; configuration is fixed at
/// construction.
#[derive(Debug, Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    backoff: BackoffPolicy,
}

impl JobQueue {
    /// Create a queue over `store` using wall-clock time.
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a queue with an explicit time source.
    pub fn with_clock(store: Arc<dyn JobStore>, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let backoff = BackoffPolicy::from_config(&config.backoff);
        Self {
            store,
            clock,
            config,
            backoff,
        }
    }

    /// Queue configuration in effect.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Current time according to the queue's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Enqueue a job and return the persisted row.
    ///
    /// With `options.dedupe`, an active job with the same fingerprint is
    /// returned instead of inserting a new one.
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> AppResult<Job> {
        self.submit(job_type, payload, options)
            .await
            .map(InsertOutcome::into_job)
    }

    /// Like [`enqueue`](Self::enqueue), but reports whether the job was reused.
    pub async fn submit(
        &self,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> AppResult<InsertOutcome> {
        let new = self.prepare(job_type, payload, &options)?;

        if !options.dedupe {
            let job = self.store.insert(&new).await?;
            tracing::info!(
                job_id = %job.id,
                job_type = %job.job_type,
                priority = job.priority,
                run_at = %job.run_at,
                "Enqueued job"
            );
            return Ok(InsertOutcome::Inserted(job));
        }

        let outcome = self.store.insert_deduped(&new).await?;
        match &outcome {
            InsertOutcome::Inserted(job) => tracing::info!(
                job_id = %job.id,
                job_type = %job.job_type,
                priority = job.priority,
                run_at = %job.run_at,
                "Enqueued job"
            ),
            InsertOutcome::Existing(job) => tracing::debug!(
                job_id = %job.id,
                job_type = %job.job_type,
                status = %job.status,
                "Reused active job with the same fingerprint"
            ),
        }
        Ok(outcome)
    }

    /// Enqueue several jobs, validating each entry on its own.
    pub async fn enqueue_batch(
        &self,
        specs: Vec<JobSpec>,
        priority: i32,
        dedupe: bool,
    ) -> AppResult<EnqueueReport> {
        let mut report = EnqueueReport::default();

        for spec in specs {
            let reason = if spec.job_type.trim().is_empty() {
                Some("job_type must not be empty")
            } else if !spec.payload.is_object() {
                Some("payload must be a JSON object")
            } else {
                None
            };
            if let Some(reason) = reason {
                report.rejected.push(RejectedJob {
                    job_type: spec.job_type,
                    payload: spec.payload,
                    reason: reason.to_string(),
                });
                continue;
            }

            let options = EnqueueOptions {
                priority,
                dedupe,
                ..EnqueueOptions::default()
            };
            match self.submit(&spec.job_type, spec.payload, options).await? {
                InsertOutcome::Inserted(job) => report.accepted.push(job),
                InsertOutcome::Existing(job) => report.reused.push(job),
            }
        }

        tracing::info!(
            accepted = report.accepted.len(),
            reused = report.reused.len(),
            rejected = report.rejected.len(),
            "Batch enqueue finished"
        );
        Ok(report)
    }

    fn prepare(&self, job_type: &str, payload: Value, options: &EnqueueOptions) -> AppResult<NewJob> {
        let job_type = job_type.trim();
        if job_type.is_empty() {
            return Err(AppError::validation("job_type must not be empty"));
        }
        if options.priority < 0 {
            return Err(AppError::validation(format!(
                "priority must not be negative, got {}",
                options.priority
            )));
        }

        let payload = if payload.is_null() {
            Value::Object(Map::new())
        } else {
            payload
        };
        let max_attempts = options
            .max_attempts
            .filter(|n| *n > 0)
            .unwrap_or(self.config.max_attempts)
            .max(1);
        let fingerprint = options
            .dedupe
            .then(|| fingerprint_value(job_type, &payload));
        let now = self.clock.now();

        Ok(NewJob {
            job_type: job_type.to_string(),
            payload,
            priority: options.priority,
            run_at: options.run_at.unwrap_or(now),
            max_attempts,
            fingerprint,
            created_at: now,
        })
    }

    /// Claim the next due job, optionally restricted to `job_types`.
    ///
    /// An empty queue is `Ok(None)`, not an error.
    pub async fn claim(&self, job_types: Option<&[String]>) -> AppResult<Option<Job>> {
        let allowed: Option<Vec<String>> = job_types.and_then(|types| {
            let cleaned: Vec<String> = types
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            (!cleaned.is_empty()).then_some(cleaned)
        });

        let job = self
            .store
            .claim_next(allowed.as_deref(), self.clock.now())
            .await?;

        match &job {
            Some(job) => tracing::info!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                "Claimed job"
            ),
            None => tracing::trace!("No claimable job"),
        }
        Ok(job)
    }

    /// Mark a running job as done, keeping any progress snapshot in `result`.
    pub async fn complete(&self, job_id: JobId) -> AppResult<()> {
        self.finish(job_id, None, None).await
    }

    /// Mark a running job as done and store its final result.
    pub async fn complete_with_result(&self, job_id: JobId, result: Value) -> AppResult<()> {
        self.finish(job_id, None, Some(&result)).await
    }

    /// Complete the claim that returned `job`.
    ///
    /// Ignored when the job has since been reaped, whether or not another
    /// worker has claimed it again. `result = None` keeps any progress
    /// snapshot.
    pub async fn complete_claim(&self, job: &Job, result: Option<Value>) -> AppResult<()> {
        self.finish(job.id, Some(job.attempts), result.as_ref()).await
    }

    async fn finish(
        &self,
        job_id: JobId,
        attempt: Option<i32>,
        result: Option<&Value>,
    ) -> AppResult<()> {
        if self
            .store
            .mark_done(job_id, attempt, result, self.clock.now())
            .await?
        {
            tracing::info!(job_id = %job_id, "Job completed");
        } else {
            tracing::warn!(
                job_id = %job_id,
                ?attempt,
                "Ignoring completion of a job that is not running under this claim"
            );
        }
        Ok(())
    }

    /// Record a failed attempt of the claim that returned `job`.
    ///
    /// With attempts left the job is requeued after a jittered backoff
    /// (`backoff_seconds` overrides the attempt-based base); otherwise it
    /// becomes terminally `failed`. Nothing is written once the claim has
    /// ended.
    pub async fn fail(
        &self,
        job: &Job,
        error: &str,
        backoff_seconds: Option<i64>,
    ) -> AppResult<FailOutcome> {
        if job.attempts_exhausted() {
            return self.fail_permanently(job, error).await;
        }

        let message = truncate_error(error, self.config.error_max_chars);
        let now = self.clock.now();
        let delay_secs = self.backoff.delay(job.attempts, backoff_seconds);
        let run_at = now + Duration::seconds(delay_secs);

        if !self
            .store
            .requeue(job.id, Some(job.attempts), run_at, message.as_deref(), now)
            .await?
        {
            // The stored budget may be tighter than the caller's copy says.
            return self.fail_permanently(job, error).await;
        }

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            delay_secs,
            "Job failed; requeued with backoff"
        );
        Ok(FailOutcome::Retrying { run_at, delay_secs })
    }

    /// Move a running job straight to `failed`, regardless of attempts left.
    pub async fn fail_permanently(&self, job: &Job, error: &str) -> AppResult<FailOutcome> {
        let message = truncate_error(error, self.config.error_max_chars);

        if !self
            .store
            .mark_failed(job.id, Some(job.attempts), message.as_deref(), self.clock.now())
            .await?
        {
            tracing::warn!(
                job_id = %job.id,
                attempts = job.attempts,
                "Ignoring failure of a job that is not running under this claim"
            );
            return Ok(FailOutcome::Skipped);
        }

        tracing::warn!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            error = message.as_deref().unwrap_or_default(),
            "Job permanently failed"
        );
        Ok(FailOutcome::Failed)
    }

    /// Publish a progress snapshot into a running job's `result`.
    ///
    /// Never changes `status`. A job that is no longer running is left
    /// untouched.
    pub async fn update_progress(
        &self,
        job_id: JobId,
        total_chunks: i64,
        completed_chunks: i64,
        current_chunk: Option<i64>,
        message: Option<&str>,
    ) -> AppResult<ProgressSnapshot> {
        self.write_progress(job_id, None, total_chunks, completed_chunks, current_chunk, message)
            .await
    }

    pub(crate) async fn write_progress(
        &self,
        job_id: JobId,
        attempt: Option<i32>,
        total_chunks: i64,
        completed_chunks: i64,
        current_chunk: Option<i64>,
        message: Option<&str>,
    ) -> AppResult<ProgressSnapshot> {
        let now = self.clock.now();
        let snapshot =
            ProgressSnapshot::new(total_chunks, completed_chunks, current_chunk, message, now);

        if self
            .store
            .write_result(job_id, attempt, &snapshot.to_value(), now)
            .await?
        {
            tracing::debug!(
                job_id = %job_id,
                completed = snapshot.completed_chunks,
                total = snapshot.total_chunks,
                percent = snapshot.percent_complete,
                "Progress updated"
            );
        } else {
            tracing::debug!(job_id = %job_id, "Skipping progress for a job that is not running");
        }
        Ok(snapshot)
    }

    /// List jobs with an already-built filter. The window is validated here.
    pub async fn list(&self, filter: JobFilter) -> AppResult<Vec<Job>> {
        let filter = JobFilter {
            window: filter.window.validated(self.config.admin_max_limit)?,
            ..filter
        };
        self.store.list(&filter).await
    }

    /// List jobs from string-typed parameters.
    pub async fn list_query(&self, query: ListQuery) -> AppResult<Vec<Job>> {
        let filter = query.into_filter(self.config.admin_max_limit)?;
        self.store.list(&filter).await
    }

    /// Point lookup.
    pub async fn get(&self, job_id: JobId) -> AppResult<Option<Job>> {
        self.store.get(job_id).await
    }

    /// Newest job of any status with exactly this type and payload.
    pub async fn find_by_payload(&self, job_type: &str, payload: &Value) -> AppResult<Option<Job>> {
        let job_type = job_type.trim();
        if job_type.is_empty() {
            return Err(AppError::validation("job_type must not be empty"));
        }
        let empty = Value::Object(Map::new());
        let payload = if payload.is_null() { &empty } else { payload };
        self.store.find_latest_by_payload(job_type, payload).await
    }

    /// Job counts per status.
    pub async fn stats(&self) -> AppResult<QueueStats> {
        self.store.count_by_status().await
    }

    /// Re-enqueue a failed job with a fresh attempt budget.
    pub async fn retry(&self, job_id: JobId) -> AppResult<Job> {
        if let Some(job) = self.store.reset_failed(job_id, self.clock.now()).await? {
            tracing::info!(job_id = %job.id, job_type = %job.job_type, "Failed job re-enqueued");
            return Ok(job);
        }

        match self.store.get(job_id).await? {
            None => Err(AppError::not_found(format!("Job {job_id} not found"))),
            Some(job) => Err(AppError::conflict(format!(
                "Job {job_id} is {}; only failed jobs can be retried",
                job.status
            ))),
        }
    }

    /// Apply the failure policy to jobs running for longer than `older_than`.
    ///
    /// Returns the jobs as stored afterwards.
    pub async fn reap_stale(&self, older_than: Duration) -> AppResult<Vec<Job>> {
        let Some(cutoff) = self.clock.now().checked_sub_signed(older_than) else {
            return Ok(Vec::new());
        };
        let stale = self.store.running_started_before(cutoff).await?;
        let message = format!(
            "job exceeded running threshold of {}s",
            older_than.num_seconds()
        );

        let mut reaped = Vec::with_capacity(stale.len());
        for job in stale {
            if self.fail(&job, &message, None).await? == FailOutcome::Skipped {
                continue;
            }
            if let Some(updated) = self.store.get(job.id).await? {
                reaped.push(updated);
            }
        }

        if !reaped.is_empty() {
            tracing::warn!(count = reaped.len(), threshold_secs = older_than.num_seconds(), "Reaped stale running jobs");
        }
        Ok(reaped)
    }
}
