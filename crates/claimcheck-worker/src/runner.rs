//! Worker runner — main loop that claims jobs and executes them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time;
use tracing::{self, Instrument};

use claimcheck_core::config::WorkerConfig;
use claimcheck_core::error::AppError;
use claimcheck_core::result::AppResult;
use claimcheck_core::types::JobId;
use claimcheck_entity::job::Job;

use crate::executor::{JobContext, JobExecutionError, JobExecutor};
use crate::queue::{FailOutcome, JobQueue};

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Nothing was claimable.
    Idle,
    /// The job finished successfully.
    Completed(JobId),
    /// The job failed and was requeued.
    Retrying {
        /// The job
        job_id: JobId,
        /// When it becomes claimable again
        run_at: DateTime<Utc>,
    },
    /// The job failed terminally, or was no longer running when its
    /// failure was recorded.
    Failed(JobId),
}

/// Main worker runner: one job at a time, sleeping only when idle
#[derive(Debug)]
pub struct WorkerRunner {
    queue: Arc<JobQueue>,
    executor: Arc<JobExecutor>,
    config: WorkerConfig,
    worker_id: String,
}

impl WorkerRunner {
    /// Create a new worker runner
    pub fn new(
        queue: Arc<JobQueue>,
        executor: Arc<JobExecutor>,
        config: WorkerConfig,
        worker_id: String,
    ) -> Self {
        Self {
            queue,
            executor,
            config,
            worker_id,
        }
    }

    /// Identifier used in logs and handed to handlers.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn job_types(&self) -> Option<&[String]> {
        (!self.config.job_types.is_empty()).then_some(self.config.job_types.as_slice())
    }

    /// Run until the cancel signal is received (or after one job when
    /// `worker.once` is set).
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        tracing::info!(
            worker_id = %self.worker_id,
            poll_interval_secs = self.config.poll_interval().as_secs(),
            job_types = ?self.config.job_types,
            reaper_threshold_secs = ?self.config.stale_after_seconds,
            "Worker started"
        );

        let poll_interval = self.config.poll_interval();

        loop {
            if *cancel.borrow() {
                break;
            }

            let outcome = match self.run_once().await {
                Ok(outcome) => outcome,
                Err(e) if e.kind.is_caller_error() => {
                    tracing::warn!(worker_id = %self.worker_id, error = %e, "Worker poll rejected");
                    JobOutcome::Idle
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.worker_id, error = %e, "Worker poll failed");
                    JobOutcome::Idle
                }
            };

            if self.config.once {
                tracing::info!(worker_id = %self.worker_id, ?outcome, "Single-shot worker finished");
                break;
            }

            if outcome != JobOutcome::Idle {
                continue;
            }

            self.reap_if_enabled().await;

            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = time::sleep(poll_interval) => {}
            }
        }

        tracing::info!(worker_id = %self.worker_id, "Worker shut down");
    }

    /// Claim and process at most one job.
    pub async fn run_once(&self) -> AppResult<JobOutcome> {
        let Some(job) = self.queue.claim(self.job_types()).await? else {
            return Ok(JobOutcome::Idle);
        };

        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            job_type = %job.job_type,
            worker_id = %self.worker_id
        );
        self.process(job).instrument(span).await
    }

    async fn process(&self, job: Job) -> AppResult<JobOutcome> {
        let executor = Arc::clone(&self.executor);
        let ctx = JobContext::new(Arc::clone(&self.queue), &job, self.worker_id.clone());
        let task_job = job.clone();

        // A panicking handler only takes down its own task.
        let result = tokio::spawn(
            async move { executor.execute(&task_job, &ctx).await }.in_current_span(),
        )
        .await
        .unwrap_or_else(|join_err| {
            Err(JobExecutionError::Internal(AppError::internal(format!(
                "job handler crashed: {join_err}"
            ))))
        });

        let err = match result {
            Ok(value) => {
                self.queue.complete_claim(&job, value).await?;
                return Ok(JobOutcome::Completed(job.id));
            }
            Err(err) => err,
        };

        tracing::warn!(
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            error = %err,
            "Job handler failed"
        );

        let outcome = match &err {
            JobExecutionError::Permanent(message) => {
                self.queue.fail_permanently(&job, message).await?
            }
            JobExecutionError::Backoff { message, seconds } => {
                self.queue.fail(&job, message, Some(*seconds)).await?
            }
            other => self.queue.fail(&job, &other.message(), None).await?,
        };

        Ok(match outcome {
            FailOutcome::Retrying { run_at, .. } => JobOutcome::Retrying {
                job_id: job.id,
                run_at,
            },
            FailOutcome::Failed | FailOutcome::Skipped => JobOutcome::Failed(job.id),
        })
    }

    async fn reap_if_enabled(&self) {
        let Some(threshold) = self.config.stale_after_seconds else {
            return;
        };
        let Some(older_than) = i64::try_from(threshold)
            .ok()
            .and_then(chrono::Duration::try_seconds)
        else {
            tracing::warn!(worker_id = %self.worker_id, threshold, "Reaper threshold out of range; skipping");
            return;
        };
        if let Err(e) = self.queue.reap_stale(older_than).await {
            tracing::error!(worker_id = %self.worker_id, error = %e, "Stale job reaper failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use claimcheck_core::config::QueueConfig;
    use claimcheck_core::traits::{Clock, ManualClock};
    use claimcheck_database::MemoryJobStore;
    use claimcheck_entity::job::JobStatus;
    use serde_json::{Value, json};

    use crate::executor::JobHandler;
    use crate::queue::EnqueueOptions;

    #[derive(Debug)]
    struct Scripted {
        job_type: &'static str,
    }

    #[async_trait]
    impl JobHandler for Scripted {
        fn job_type(&self) -> &str {
            self.job_type
        }

        async fn execute(
            &self,
            job: &Job,
            ctx: &JobContext,
        ) -> Result<Option<Value>, JobExecutionError> {
            match job.payload["mode"].as_str().unwrap_or("ok") {
                "ok" => {
                    ctx.report_progress(2, 2, Some(2), None).await?;
                    Ok(Some(json!({"claims": 3})))
                }
                "silent" => {
                    ctx.report_progress(4, 1, Some(1), Some("chunk 1")).await?;
                    Ok(None)
                }
                "transient" => Err(JobExecutionError::Transient("upstream timeout".into())),
                "backoff" => Err(JobExecutionError::Backoff {
                    message: "rate limited".into(),
                    seconds: 900,
                }),
                "permanent" => Err(JobExecutionError::Permanent("episode deleted".into())),
                _ => panic!("handler blew up"),
            }
        }
    }

    fn runner(config: WorkerConfig) -> (WorkerRunner, Arc<JobQueue>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let queue = Arc::new(JobQueue::with_clock(
            Arc::new(MemoryJobStore::new()),
            QueueConfig::default(),
            clock.clone(),
        ));
        let mut executor = JobExecutor::new();
        executor.register(Arc::new(Scripted {
            job_type: "summarize",
        }));
        let runner = WorkerRunner::new(
            Arc::clone(&queue),
            Arc::new(executor),
            config,
            "worker-test".to_string(),
        );
        (runner, queue, clock)
    }

    async fn enqueue(queue: &JobQueue, job_type: &str, mode: &str) -> Job {
        queue
            .enqueue(job_type, json!({"mode": mode}), EnqueueOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_idle_when_empty() {
        let (runner, _queue, _clock) = runner(WorkerConfig::default());
        assert_eq!(runner.run_once().await.unwrap(), JobOutcome::Idle);
    }

    #[tokio::test]
    async fn test_success_stores_result() {
        let (runner, queue, _clock) = runner(WorkerConfig::default());
        let job = enqueue(&queue, "summarize", "ok").await;

        assert_eq!(runner.run_once().await.unwrap(), JobOutcome::Completed(job.id));
        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Done);
        assert_eq!(stored.result, Some(json!({"claims": 3})));
    }

    #[tokio::test]
    async fn test_success_without_result_keeps_progress() {
        let (runner, queue, _clock) = runner(WorkerConfig::default());
        let job = enqueue(&queue, "summarize", "silent").await;

        runner.run_once().await.unwrap();
        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Done);
        assert_eq!(stored.result.unwrap()["message"], json!("chunk 1"));
    }

    #[tokio::test]
    async fn test_failures_map_to_fail_policy() {
        let (runner, queue, clock) = runner(WorkerConfig::default());

        let transient = enqueue(&queue, "summarize", "transient").await;
        let JobOutcome::Retrying { job_id, run_at } = runner.run_once().await.unwrap() else {
            panic!("expected retry");
        };
        assert_eq!(job_id, transient.id);
        assert!(run_at > clock.now());
        let stored = queue.get(transient.id).await.unwrap().unwrap();
        assert_eq!(stored.last_error.as_deref(), Some("upstream timeout"));

        let backoff = enqueue(&queue, "summarize", "backoff").await;
        let JobOutcome::Retrying { run_at, .. } = runner.run_once().await.unwrap() else {
            panic!("expected retry");
        };
        let delay = (run_at - clock.now()).num_seconds();
        assert!((720..=1080).contains(&delay));
        assert_eq!(
            queue.get(backoff.id).await.unwrap().unwrap().last_error.as_deref(),
            Some("rate limited")
        );

        let permanent = enqueue(&queue, "summarize", "permanent").await;
        assert_eq!(runner.run_once().await.unwrap(), JobOutcome::Failed(permanent.id));
        let stored = queue.get(permanent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_unsupported_type_is_failed_not_fatal() {
        let (runner, queue, _clock) = runner(WorkerConfig::default());
        let job = enqueue(&queue, "extract_claims", "ok").await;

        assert!(matches!(
            runner.run_once().await.unwrap(),
            JobOutcome::Retrying { .. }
        ));
        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(
            stored.last_error.as_deref(),
            Some("unsupported job type: extract_claims")
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_failure() {
        let (runner, queue, _clock) = runner(WorkerConfig::default());
        let job = enqueue(&queue, "summarize", "explode").await;

        assert!(matches!(
            runner.run_once().await.unwrap(),
            JobOutcome::Retrying { .. }
        ));
        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert!(stored.last_error.unwrap().contains("job handler crashed"));
    }

    #[tokio::test]
    async fn test_job_types_restrict_claims() {
        let (runner, queue, _clock) = runner(WorkerConfig {
            job_types: vec!["auto_grade".to_string()],
            ..WorkerConfig::default()
        });
        enqueue(&queue, "summarize", "ok").await;
        assert_eq!(runner.run_once().await.unwrap(), JobOutcome::Idle);
    }

    #[tokio::test]
    async fn test_run_once_mode_returns_after_one_job() {
        let (runner, queue, _clock) = runner(WorkerConfig {
            once: true,
            ..WorkerConfig::default()
        });
        let first = enqueue(&queue, "summarize", "ok").await;
        let second = enqueue(&queue, "summarize", "ok").await;

        let (_tx, rx) = watch::channel(false);
        runner.run(rx).await;

        assert_eq!(queue.get(first.id).await.unwrap().unwrap().status, JobStatus::Done);
        assert_eq!(queue.get(second.id).await.unwrap().unwrap().status, JobStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_queue_then_stops_on_cancel() {
        let (runner, queue, _clock) = runner(WorkerConfig::default());
        let runner = Arc::new(runner);
        let a = enqueue(&queue, "summarize", "ok").await;
        let b = enqueue(&queue, "summarize", "ok").await;

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run(rx).await }
        });

        time::sleep(std::time::Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(queue.get(a.id).await.unwrap().unwrap().status, JobStatus::Done);
        assert_eq!(queue.get(b.id).await.unwrap().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_idle_poll_reaps_stale_jobs_when_enabled() {
        let (runner, queue, clock) = runner(WorkerConfig {
            stale_after_seconds: Some(60),
            ..WorkerConfig::default()
        });
        let job = enqueue(&queue, "summarize", "ok").await;
        queue.claim(None).await.unwrap().unwrap();
        clock.advance(chrono::Duration::seconds(120));

        runner.reap_if_enabled().await;
        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(
            stored.last_error.as_deref(),
            Some("job exceeded running threshold of 60s")
        );
    }
}
