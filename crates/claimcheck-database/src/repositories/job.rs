//! Job repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};

use claimcheck_core::error::{AppError, ErrorKind};
use claimcheck_core::result::AppResult;
use claimcheck_core::types::JobId;
use claimcheck_entity::job::{Job, JobFilter, JobStatus, NewJob, QueueStats};

use crate::store::{InsertOutcome, JobStore};

/// PostgreSQL `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Rounds of insert-then-lookup before a deduplicated insert gives up.
const DEDUPE_ROUNDS: usize = 3;

/// Repository for background job CRUD and queue operations.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Create a new job repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

#[async_trait]
impl JobStore for JobRepository {
    async fn insert(&self, new: &NewJob) -> AppResult<Job> {
        sqlx::query_as::<_, Job>(
            "INSERT INTO jobs (job_type, payload, priority, run_at, max_attempts, fingerprint, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7) RETURNING *",
        )
        .bind(&new.job_type)
        .bind(&new.payload)
        .bind(new.priority)
        .bind(new.run_at)
        .bind(new.max_attempts)
        .bind(&new.fingerprint)
        .bind(new.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::with_source(
                    ErrorKind::Conflict,
                    "An active job already holds this fingerprint",
                    e,
                )
            } else {
                AppError::with_source(ErrorKind::Database, "Failed to create job", e)
            }
        })
    }

    async fn insert_deduped(&self, new: &NewJob) -> AppResult<InsertOutcome> {
        let Some(fingerprint) = new.fingerprint.as_deref() else {
            return self.insert(new).await.map(InsertOutcome::Inserted);
        };

        for _ in 0..DEDUPE_ROUNDS {
            // The partial unique index turns a concurrent duplicate into "no row".
            let inserted = sqlx::query_as::<_, Job>(
                "INSERT INTO jobs (job_type, payload, priority, run_at, max_attempts, fingerprint, \
                 created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
                 ON CONFLICT DO NOTHING RETURNING *",
            )
            .bind(&new.job_type)
            .bind(&new.payload)
            .bind(new.priority)
            .bind(new.run_at)
            .bind(new.max_attempts)
            .bind(fingerprint)
            .bind(new.created_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create job", e))?;

            if let Some(job) = inserted {
                return Ok(InsertOutcome::Inserted(job));
            }

            if let Some(existing) = self.find_active_by_fingerprint(fingerprint).await? {
                return Ok(InsertOutcome::Existing(existing));
            }

            tracing::debug!(
                fingerprint,
                "Active fingerprint holder finished during enqueue; retrying insert"
            );
        }

        Err(AppError::conflict(format!(
            "Could not resolve deduplicated enqueue for fingerprint {fingerprint}"
        )))
    }

    async fn find_active_by_fingerprint(&self, fingerprint: &str) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE fingerprint = $1 AND status IN ('queued', 'running') \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find job by fingerprint", e))
    }

    async fn find_latest_by_payload(
        &self,
        job_type: &str,
        payload: &Value,
    ) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE job_type = $1 AND payload = $2 ORDER BY id DESC LIMIT 1",
        )
        .bind(job_type)
        .bind(payload)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find job by payload", e))
    }

    async fn claim_next(
        &self,
        job_types: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "UPDATE jobs SET status = 'running', attempts = attempts + 1, started_at = $1, \
             finished_at = NULL, updated_at = $1 \
             WHERE status = 'queued' AND id = ( \
                SELECT id FROM jobs \
                WHERE status = 'queued' AND run_at <= $1 \
                AND ($2::text[] IS NULL OR job_type = ANY($2)) \
                ORDER BY priority DESC, run_at ASC, id ASC \
                LIMIT 1 \
                FOR UPDATE SKIP LOCKED \
             ) RETURNING *",
        )
        .bind(now)
        .bind(job_types.map(<[String]>::to_vec))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to claim job", e))
    }

    async fn mark_done(
        &self,
        id: JobId,
        attempt: Option<i32>,
        result: Option<&Value>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let outcome = sqlx::query(
            "UPDATE jobs SET status = 'done', result = COALESCE($3, result), last_error = NULL, \
             finished_at = $4, updated_at = $4 \
             WHERE id = $1 AND status = 'running' AND ($2::int4 IS NULL OR attempts = $2)",
        )
        .bind(id)
        .bind(attempt)
        .bind(result)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to complete job", e))?;
        Ok(outcome.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        id: JobId,
        attempt: Option<i32>,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let outcome = sqlx::query(
            "UPDATE jobs SET status = 'failed', last_error = $3, finished_at = $4, updated_at = $4 \
             WHERE id = $1 AND status = 'running' AND ($2::int4 IS NULL OR attempts = $2)",
        )
        .bind(id)
        .bind(attempt)
        .bind(message)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to mark job as failed", e))?;
        Ok(outcome.rows_affected() == 1)
    }

    async fn requeue(
        &self,
        id: JobId,
        attempt: Option<i32>,
        run_at: DateTime<Utc>,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let outcome = sqlx::query(
            "UPDATE jobs SET status = 'queued', run_at = $3, last_error = $4, started_at = NULL, \
             finished_at = NULL, updated_at = $5 \
             WHERE id = $1 AND status = 'running' AND ($2::int4 IS NULL OR attempts = $2) \
             AND attempts < max_attempts",
        )
        .bind(id)
        .bind(attempt)
        .bind(run_at)
        .bind(message)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to requeue job", e))?;
        Ok(outcome.rows_affected() == 1)
    }

    async fn write_result(
        &self,
        id: JobId,
        attempt: Option<i32>,
        result: &Value,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let outcome = sqlx::query(
            "UPDATE jobs SET result = $3, updated_at = $4 \
             WHERE id = $1 AND status = 'running' AND ($2::int4 IS NULL OR attempts = $2)",
        )
        .bind(id)
        .bind(attempt)
        .bind(result)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to update job progress", e))?;
        Ok(outcome.rows_affected() == 1)
    }

    async fn list(&self, filter: &JobFilter) -> AppResult<Vec<Job>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM jobs");
        let mut separator = " WHERE ";

        if let Some(status) = filter.status {
            query.push(separator).push("status = ").push_bind(status);
            separator = " AND ";
        }
        if let Some(job_type) = &filter.job_type {
            query.push(separator).push("job_type = ").push_bind(job_type.clone());
        }

        query.push(" ORDER BY ").push(filter.order.sql());

        if let Some(limit) = filter.window.limit {
            query.push(" LIMIT ").push_bind(limit);
        }
        if filter.window.offset > 0 {
            query.push(" OFFSET ").push_bind(filter.window.offset);
        }

        query
            .build_query_as::<Job>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list jobs", e))
    }

    async fn get(&self, id: JobId) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find job", e))
    }

    async fn count_by_status(&self) -> AppResult<QueueStats> {
        let rows: Vec<(JobStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count jobs", e))?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            stats.record(status, count);
        }
        Ok(stats)
    }

    async fn reset_failed(&self, id: JobId, now: DateTime<Utc>) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "UPDATE jobs SET status = 'queued', attempts = 0, run_at = $2, last_error = NULL, \
             started_at = NULL, finished_at = NULL, updated_at = $2 \
             WHERE id = $1 AND status = 'failed' RETURNING *",
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::with_source(
                    ErrorKind::Conflict,
                    format!("Another active job already holds the fingerprint of job {id}"),
                    e,
                )
            } else {
                AppError::with_source(ErrorKind::Database, "Failed to retry job", e)
            }
        })
    }

    async fn running_started_before(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE status = 'running' AND started_at < $1 ORDER BY started_at, id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find stale jobs", e))
    }
}
