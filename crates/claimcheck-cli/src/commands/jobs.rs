//! Job queue CLI commands.

use chrono::{DateTime, Duration, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use claimcheck_core::error::AppError;
use claimcheck_core::types::JobId;
use claimcheck_entity::job::{Job, JobOrder};
use claimcheck_worker::{EnqueueOptions, ListQuery};

/// Width of the error column in job tables.
const ERROR_PREVIEW_CHARS: usize = 48;

/// Arguments for job commands
#[derive(Debug, Args)]
pub struct JobsArgs {
    /// Job subcommand
    #[command(subcommand)]
    pub command: JobsCommand,
}

/// Job subcommands
#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// Enqueue a job
    Enqueue {
        /// Job type label
        job_type: String,
        /// JSON payload
        #[arg(long, default_value = "{}", value_parser = parse_json)]
        payload: Value,
        /// Higher runs first
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// Earliest run time (RFC 3339)
        #[arg(long)]
        run_at: Option<DateTime<Utc>>,
        /// Attempts before permanent failure
        #[arg(long)]
        max_attempts: Option<i32>,
        /// Reuse an active job with the same type and payload
        #[arg(long)]
        dedupe: bool,
    },
    /// List jobs
    List {
        /// Filter by status (queued, running, done, failed)
        #[arg(long)]
        status: Option<String>,
        /// Filter by job type
        #[arg(long = "type")]
        job_type: Option<String>,
        /// Maximum rows
        #[arg(long, default_value_t = 50)]
        limit: i64,
        /// Rows to skip
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Order as workers would claim instead of newest first
        #[arg(long)]
        dispatch_order: bool,
    },
    /// Show one job
    Get {
        /// Job ID
        id: JobId,
    },
    /// Count jobs per status
    Stats,
    /// Re-enqueue a failed job
    Retry {
        /// Job ID
        id: JobId,
    },
    /// Apply the failure policy to jobs stuck in `running`
    Reap {
        /// Running for longer than this many seconds
        #[arg(long)]
        older_than_secs: i64,
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

/// Job display row
#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    /// Job ID
    id: i64,
    /// Type
    job_type: String,
    /// Status
    status: String,
    /// Priority
    priority: i32,
    /// Attempts used / allowed
    attempts: String,
    /// Next eligible run
    run_at: String,
    /// Last error
    last_error: String,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        let last_error = job
            .last_error
            .as_deref()
            .map(|e| {
                let mut preview: String = e.chars().take(ERROR_PREVIEW_CHARS).collect();
                if e.chars().count() > ERROR_PREVIEW_CHARS {
                    preview.push('…');
                }
                preview
            })
            .unwrap_or_default();
        Self {
            id: job.id.get(),
            job_type: job.job_type.clone(),
            status: job.status.to_string(),
            priority: job.priority,
            attempts: format!("{}/{}", job.attempts, job.max_attempts),
            run_at: job.run_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            last_error,
        }
    }
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON payload: {e}"))
}

fn print_jobs(jobs: &[Job], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
            output::print_list(&rows, format);
        }
        OutputFormat::Json => output::print_json(jobs),
    }
}

fn print_job(job: &Job, format: OutputFormat) {
    if format == OutputFormat::Json {
        output::print_json(job);
        return;
    }

    let optional = |ts: Option<DateTime<Utc>>| ts.map(|t| t.to_rfc3339()).unwrap_or_default();
    output::print_kv("ID", &job.id.to_string());
    output::print_kv("Type", &job.job_type);
    output::print_kv("Status", job.status.as_str());
    output::print_kv("Priority", &job.priority.to_string());
    output::print_kv(
        "Attempts",
        &format!("{}/{}", job.attempts, job.max_attempts),
    );
    output::print_kv("Run at", &job.run_at.to_rfc3339());
    output::print_kv("Payload", &job.payload.to_string());
    output::print_kv(
        "Result",
        &job.result.as_ref().map(Value::to_string).unwrap_or_default(),
    );
    output::print_kv("Last error", job.last_error.as_deref().unwrap_or_default());
    output::print_kv("Fingerprint", job.fingerprint.as_deref().unwrap_or_default());
    output::print_kv("Created", &job.created_at.to_rfc3339());
    output::print_kv("Started", &optional(job.started_at));
    output::print_kv("Finished", &optional(job.finished_at));
}

/// Execute job commands
pub async fn execute(
    args: &JobsArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let queue = super::open_queue(&config).await?;

    match &args.command {
        JobsCommand::Enqueue {
            job_type,
            payload,
            priority,
            run_at,
            max_attempts,
            dedupe,
        } => {
            let options = EnqueueOptions {
                priority: *priority,
                run_at: *run_at,
                max_attempts: *max_attempts,
                dedupe: *dedupe,
            };
            let outcome = queue.submit(job_type, payload.clone(), options).await?;
            if format == OutputFormat::Table {
                let verb = if outcome.is_existing() {
                    "Reused active job"
                } else {
                    "Enqueued job"
                };
                output::print_success(&format!("{verb} {}", outcome.job().id));
            }
            print_job(outcome.job(), format);
        }
        JobsCommand::List {
            status,
            job_type,
            limit,
            offset,
            dispatch_order,
        } => {
            let query = ListQuery {
                status: status.clone(),
                job_type: job_type.clone(),
                limit: Some(*limit),
                offset: *offset,
                order: if *dispatch_order {
                    JobOrder::Dispatch
                } else {
                    JobOrder::Admin
                },
            };
            let jobs = queue.list_query(query).await?;
            print_jobs(&jobs, format);
        }
        JobsCommand::Get { id } => {
            let job = queue
                .get(*id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
            print_job(&job, format);
        }
        JobsCommand::Stats => {
            let stats = queue.stats().await?;
            match format {
                OutputFormat::Json => output::print_json(&stats),
                OutputFormat::Table => {
                    output::print_kv("Queued", &stats.queued.to_string());
                    output::print_kv("Running", &stats.running.to_string());
                    output::print_kv("Done", &stats.done.to_string());
                    output::print_kv("Failed", &stats.failed.to_string());
                    output::print_kv("Total", &stats.total().to_string());
                }
            }
        }
        JobsCommand::Retry { id } => {
            let job = queue.retry(*id).await?;
            if format == OutputFormat::Table {
                output::print_success(&format!("Job {} re-enqueued", job.id));
            }
            print_job(&job, format);
        }
        JobsCommand::Reap {
            older_than_secs,
            force,
        } => {
            if *older_than_secs <= 0 {
                return Err(AppError::validation("--older-than-secs must be positive"));
            }
            if !force {
                let confirm = dialoguer::Confirm::new()
                    .with_prompt(format!(
                        "Fail or requeue every job running for more than {older_than_secs}s?"
                    ))
                    .default(false)
                    .interact()
                    .map_err(|e| AppError::internal(format!("Input error: {e}")))?;

                if !confirm {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            let reaped = queue.reap_stale(Duration::seconds(*older_than_secs)).await?;
            match format {
                OutputFormat::Table if reaped.is_empty() => {
                    output::print_warning("No stale running jobs found.");
                }
                OutputFormat::Table => {
                    output::print_success(&format!("Reaped {} jobs", reaped.len()));
                    print_jobs(&reaped, format);
                }
                OutputFormat::Json => print_jobs(&reaped, format),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimcheck_core::config::QueueConfig;
    use claimcheck_database::MemoryJobStore;
    use claimcheck_worker::JobQueue;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_parse_json() {
        assert_eq!(parse_json(r#"{"episode_id": 1}"#).unwrap(), json!({"episode_id": 1}));
        assert!(parse_json("{episode_id").is_err());
    }

    #[test]
    fn test_cli_parses_jobs_commands() {
        use crate::commands::{Cli, Commands};
        use clap::Parser;

        let cli = Cli::try_parse_from([
            "claimcheck-cli",
            "--format",
            "json",
            "jobs",
            "enqueue",
            "summarize",
            "--payload",
            r#"{"episode_id": 1}"#,
            "--priority",
            "5",
            "--dedupe",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        let Commands::Jobs(JobsArgs {
            command:
                JobsCommand::Enqueue {
                    job_type,
                    payload,
                    priority,
                    dedupe,
                    ..
                },
        }) = cli.command
        else {
            panic!("expected jobs enqueue");
        };
        assert_eq!(job_type, "summarize");
        assert_eq!(payload, json!({"episode_id": 1}));
        assert_eq!(priority, 5);
        assert!(dedupe);

        let cli = Cli::try_parse_from([
            "claimcheck-cli",
            "jobs",
            "list",
            "--status",
            "failed",
            "--type",
            "auto_grade",
            "--dispatch-order",
        ])
        .unwrap();
        let Commands::Jobs(JobsArgs {
            command:
                JobsCommand::List {
                    status,
                    job_type,
                    limit,
                    dispatch_order,
                    ..
                },
        }) = cli.command
        else {
            panic!("expected jobs list");
        };
        assert_eq!(status.as_deref(), Some("failed"));
        assert_eq!(job_type.as_deref(), Some("auto_grade"));
        assert_eq!(limit, 50);
        assert!(dispatch_order);

        assert!(Cli::try_parse_from(["claimcheck-cli", "jobs", "get", "abc"]).is_err());
    }

    #[tokio::test]
    async fn test_job_row_truncates_error() {
        let queue = JobQueue::new(Arc::new(MemoryJobStore::new()), QueueConfig::default());
        queue
            .enqueue("summarize", json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        let claimed = queue.claim(None).await.unwrap().unwrap();
        queue.fail(&claimed, &"x".repeat(100), None).await.unwrap();
        let job = queue.get(claimed.id).await.unwrap().unwrap();

        let row = JobRow::from(&job);
        assert_eq!(row.status, "queued");
        assert_eq!(row.attempts, "1/3");
        assert_eq!(row.last_error.chars().count(), ERROR_PREVIEW_CHARS + 1);
    }
}
