//! Job executor — dispatches claimed jobs to registered handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing;

use claimcheck_core::error::AppError;
use claimcheck_core::result::AppResult;
use claimcheck_core::types::JobId;
use claimcheck_entity::job::{Job, ProgressSnapshot};

use crate::queue::JobQueue;

/// Trait for job handler implementations
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug {
    /// Get the job type this handler processes
    fn job_type(&self) -> &str;

    /// Execute the job. `Ok(Some(value))` is stored as the job's result.
    async fn execute(&self, job: &Job, ctx: &JobContext) -> Result<Option<Value>, JobExecutionError>;
}

/// Error from job execution
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Failure worth retrying with the default backoff
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// Failure worth retrying after a specific delay
    #[error("Job failure, retry in {seconds}s: {message}")]
    Backoff {
        /// Failure description
        message: String,
        /// Requested base delay in seconds
        seconds: i64,
    },

    /// Failure that must not be retried
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// No handler is registered for the job type
    #[error("unsupported job type: {0}")]
    Unsupported(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl JobExecutionError {
    /// Message recorded in the job's `last_error`.
    pub fn message(&self) -> String {
        match self {
            Self::Transient(message)
            | Self::Permanent(message)
            | Self::Backoff { message, .. } => message.clone(),
            Self::Unsupported(_) => self.to_string(),
            Self::Internal(err) => err.to_string(),
        }
    }
}

/// Handle given to a handler while its job runs.
///
/// Bound to the claim it was created for: once that claim ends (the job
/// finished, or was reaped and claimed again) progress reports are ignored.
#[derive(Debug, Clone)]
pub struct JobContext {
    queue: Arc<JobQueue>,
    job_id: JobId,
    attempt: i32,
    worker_id: String,
}

impl JobContext {
    /// Create a context for the claim of `job` held by `worker_id`.
    pub fn new(queue: Arc<JobQueue>, job: &Job, worker_id: impl Into<String>) -> Self {
        Self {
            queue,
            job_id: job.id,
            attempt: job.attempts,
            worker_id: worker_id.into(),
        }
    }

    /// The job being executed.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// The worker executing it.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Publish a progress snapshot for the running job.
    pub async fn report_progress(
        &self,
        total_chunks: i64,
        completed_chunks: i64,
        current_chunk: Option<i64>,
        message: Option<&str>,
    ) -> AppResult<ProgressSnapshot> {
        self.queue
            .write_progress(
                self.job_id,
                Some(self.attempt),
                total_chunks,
                completed_chunks,
                current_chunk,
                message,
            )
            .await
    }
}

/// Dispatches jobs to the appropriate handler based on job_type
#[derive(Debug, Default)]
pub struct JobExecutor {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobExecutor {
    /// Create a new job executor
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job handler, replacing any previous one for the same type
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type().trim().to_string();
        tracing::info!(job_type = %job_type, "Registered job handler");
        self.handlers.insert(job_type, handler);
    }

    /// Execute a job by dispatching to the correct handler
    pub async fn execute(
        &self,
        job: &Job,
        ctx: &JobContext,
    ) -> Result<Option<Value>, JobExecutionError> {
        let handler = self
            .handlers
            .get(&job.job_type)
            .ok_or_else(|| JobExecutionError::Unsupported(job.job_type.clone()))?;

        tracing::debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            "Executing job"
        );

        handler.execute(job, ctx).await
    }

    /// Get the registered job types, sorted
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}
