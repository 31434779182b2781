//! In-process job store.
//!
//! Holds the job table in a `BTreeMap` behind a mutex. Every operation runs
//! under the lock, which gives the same atomicity the PostgreSQL store gets
//! from row locks and the active-fingerprint index. Suitable for tests and
//! single-process deployments; nothing survives a restart.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use claimcheck_core::error::AppError;
use claimcheck_core::result::AppResult;
use claimcheck_core::types::JobId;
use claimcheck_entity::job::{Job, JobFilter, JobOrder, JobStatus, NewJob, QueueStats};

use crate::store::{InsertOutcome, JobStore};

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<JobId, Job>,
    last_id: i64,
}

impl Table {
    fn next_id(&mut self) -> JobId {
        self.last_id += 1;
        JobId(self.last_id)
    }

    fn active_holder(&self, fingerprint: &str) -> Option<&Job> {
        self.rows
            .values()
            .rev()
            .find(|job| job.status.is_active() && job.fingerprint.as_deref() == Some(fingerprint))
    }

    fn running_mut(&mut self, id: JobId, attempt: Option<i32>) -> Option<&mut Job> {
        self.rows.get_mut(&id).filter(|job| {
            job.status == JobStatus::Running && attempt.is_none_or(|n| job.attempts == n)
        })
    }
}

/// Job store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    table: Mutex<Table>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows, in any status.
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    /// Whether the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, new: &NewJob) -> AppResult<Job> {
        let mut table = self.lock();
        if let Some(fingerprint) = new.fingerprint.as_deref() {
            if table.active_holder(fingerprint).is_some() {
                return Err(AppError::conflict(
                    "An active job already holds this fingerprint",
                ));
            }
        }
        let id = table.next_id();
        let job = new.clone().into_job(id);
        table.rows.insert(id, job.clone());
        Ok(job)
    }

    async fn insert_deduped(&self, new: &NewJob) -> AppResult<InsertOutcome> {
        let mut table = self.lock();
        if let Some(fingerprint) = new.fingerprint.as_deref() {
            if let Some(existing) = table.active_holder(fingerprint) {
                return Ok(InsertOutcome::Existing(existing.clone()));
            }
        }
        let id = table.next_id();
        let job = new.clone().into_job(id);
        table.rows.insert(id, job.clone());
        Ok(InsertOutcome::Inserted(job))
    }

    async fn find_active_by_fingerprint(&self, fingerprint: &str) -> AppResult<Option<Job>> {
        Ok(self.lock().active_holder(fingerprint).cloned())
    }

    async fn find_latest_by_payload(
        &self,
        job_type: &str,
        payload: &Value,
    ) -> AppResult<Option<Job>> {
        Ok(self
            .lock()
            .rows
            .values()
            .rev()
            .find(|job| job.job_type == job_type && &job.payload == payload)
            .cloned())
    }

    async fn claim_next(
        &self,
        job_types: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Job>> {
        let mut table = self.lock();
        let next = table
            .rows
            .values()
            .filter(|job| job.is_claimable_at(now))
            .filter(|job| job_types.is_none_or(|types| types.contains(&job.job_type)))
            .min_by(|a, b| JobOrder::Dispatch.compare(a, b))
            .map(|job| job.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = table.rows.get_mut(&id) else {
            return Ok(None);
        };
        job.status = JobStatus::Running;
        job.attempts += 1;
        job.started_at = Some(now);
        job.finished_at = None;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn mark_done(
        &self,
        id: JobId,
        attempt: Option<i32>,
        result: Option<&Value>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut table = self.lock();
        let Some(job) = table.running_mut(id, attempt) else {
            return Ok(false);
        };
        job.status = JobStatus::Done;
        if let Some(result) = result {
            job.result = Some(result.clone());
        }
        job.last_error = None;
        job.finished_at = Some(now);
        job.updated_at = now;
        Ok(true)
    }

    async fn mark_failed(
        &self,
        id: JobId,
        attempt: Option<i32>,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut table = self.lock();
        let Some(job) = table.running_mut(id, attempt) else {
            return Ok(false);
        };
        job.status = JobStatus::Failed;
        job.last_error = message.map(str::to_string);
        job.finished_at = Some(now);
        job.updated_at = now;
        Ok(true)
    }

    async fn requeue(
        &self,
        id: JobId,
        attempt: Option<i32>,
        run_at: DateTime<Utc>,
        message: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut table = self.lock();
        let Some(job) = table
            .running_mut(id, attempt)
            .filter(|job| !job.attempts_exhausted())
        else {
            return Ok(false);
        };
        job.status = JobStatus::Queued;
        job.run_at = run_at;
        job.last_error = message.map(str::to_string);
        job.started_at = None;
        job.finished_at = None;
        job.updated_at = now;
        Ok(true)
    }

    async fn write_result(
        &self,
        id: JobId,
        attempt: Option<i32>,
        result: &Value,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut table = self.lock();
        let Some(job) = table.running_mut(id, attempt) else {
            return Ok(false);
        };
        job.result = Some(result.clone());
        job.updated_at = now;
        Ok(true)
    }

    async fn list(&self, filter: &JobFilter) -> AppResult<Vec<Job>> {
        let table = self.lock();
        let mut jobs: Vec<Job> = table
            .rows
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| filter.order.compare(a, b));
        Ok(filter.window.apply(jobs))
    }

    async fn get(&self, id: JobId) -> AppResult<Option<Job>> {
        Ok(self.lock().rows.get(&id).cloned())
    }

    async fn count_by_status(&self) -> AppResult<QueueStats> {
        let mut stats = QueueStats::default();
        for job in self.lock().rows.values() {
            stats.record(job.status, 1);
        }
        Ok(stats)
    }

    async fn reset_failed(&self, id: JobId, now: DateTime<Utc>) -> AppResult<Option<Job>> {
        let mut table = self.lock();
        let fingerprint = match table.rows.get(&id) {
            Some(job) if job.status == JobStatus::Failed => job.fingerprint.clone(),
            _ => return Ok(None),
        };
        if let Some(fingerprint) = fingerprint.as_deref() {
            if table.active_holder(fingerprint).is_some() {
                return Err(AppError::conflict(format!(
                    "Another active job already holds the fingerprint of job {id}"
                )));
            }
        }

        let Some(job) = table.rows.get_mut(&id) else {
            return Ok(None);
        };
        job.status = JobStatus::Queued;
        job.attempts = 0;
        job.run_at = now;
        job.last_error = None;
        job.started_at = None;
        job.finished_at = None;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn running_started_before(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Job>> {
        let mut stale: Vec<Job> = self
            .lock()
            .rows
            .values()
            .filter(|job| job.status == JobStatus::Running)
            .filter(|job| job.started_at.is_some_and(|started| started < cutoff))
            .cloned()
            .collect();
        stale.sort_by_key(|job| (job.started_at, job.id));
        Ok(stale)
    }
}
