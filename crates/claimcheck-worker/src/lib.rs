//! The ClaimCheck job queue and worker.
//!
//! This crate provides:
//! - [`JobQueue`]: enqueue (with optional dedupe), atomic claim, completion,
//!   retry with jittered backoff, progress reporting and admin queries
//! - [`fingerprint`]: deterministic hashes of job type + payload
//! - [`JobExecutor`] and [`JobHandler`] for dispatching claimed jobs
//! - [`WorkerRunner`]: the poll loop run by each worker process

pub mod executor;
pub mod fingerprint;
pub mod queue;
pub mod retry;
pub mod runner;

pub use executor::{JobContext, JobExecutionError, JobExecutor, JobHandler};
pub use queue::{
    EnqueueOptions, EnqueueReport, FailOutcome, JobQueue, JobSpec, ListQuery, RejectedJob,
};
pub use retry::BackoffPolicy;
pub use runner::{JobOutcome, WorkerRunner};
