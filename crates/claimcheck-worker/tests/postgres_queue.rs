//! Queue scenarios against a real PostgreSQL database.
//!
//! Set `CLAIMCHECK_TEST_DATABASE_URL` to run them; otherwise every test
//! returns immediately. Each test works on its own uniquely named job types,
//! so they can share one database and run in parallel.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use claimcheck_core::config::{DatabaseConfig, QueueConfig};
use claimcheck_core::traits::ManualClock;
use claimcheck_database::DatabasePool;
use claimcheck_entity::job::{JobFilter, JobStatus};
use claimcheck_worker::{EnqueueOptions, FailOutcome, JobQueue};

const DATABASE_URL_ENV: &str = "CLAIMCHECK_TEST_DATABASE_URL";

/// Test context: a migrated pool and a queue over it.
struct TestDb {
    queue: Arc<JobQueue>,
    pool: DatabasePool,
}

impl TestDb {
    async fn connect() -> Option<Self> {
        let url = std::env::var(DATABASE_URL_ENV).ok()?;
        let config = DatabaseConfig {
            url,
            ..DatabaseConfig::default()
        };
        let db = DatabasePool::connect_and_migrate(&config)
            .await
            .expect("Failed to connect to test database");
        let queue = JobQueue::new(db.job_store(), QueueConfig::default());
        Some(Self {
            queue: Arc::new(queue),
            pool: db,
        })
    }

    /// A second queue over the same pool with a hand-driven clock.
    fn manual_queue(&self, clock: Arc<ManualClock>) -> JobQueue {
        JobQueue::with_clock(self.pool.job_store(), QueueConfig::default(), clock)
    }

    fn job_type(prefix: &str) -> String {
        format!("{prefix}_{}", Uuid::new_v4().simple())
    }
}

#[tokio::test]
async fn test_failure_requeues_with_backoff() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let job_type = TestDb::job_type("summarize");
    let only = vec![job_type.clone()];

    let job = db
        .queue
        .enqueue(&job_type, json!({"episode_id": 1}), EnqueueOptions::default())
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    let claimed = db.queue.claim(Some(&only)).await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.attempts, 1);
    assert!(claimed.started_at.is_some());

    let outcome = db.queue.fail(&claimed, "boom", None).await.unwrap();
    let FailOutcome::Retrying { run_at, delay_secs } = outcome else {
        panic!("expected a retry, got {outcome:?}");
    };
    assert!((48..=72).contains(&delay_secs));
    let stored = db.queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
    // PostgreSQL keeps microseconds.
    assert!((stored.run_at - run_at).num_milliseconds().abs() < 1);
    assert_eq!(stored.last_error.as_deref(), Some("boom"));

    // The backoff keeps it out of reach.
    assert!(db.queue.claim(Some(&only)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_priority_order_and_listing() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let job_type = TestDb::job_type("extract_claims");
    let only = vec![job_type.clone()];

    let mut ids = Vec::new();
    for priority in [1, 5, 9, 5] {
        let options = EnqueueOptions {
            priority,
            ..EnqueueOptions::default()
        };
        ids.push(db.queue.enqueue(&job_type, json!({}), options).await.unwrap().id);
    }

    let listed = db
        .queue
        .list(JobFilter {
            job_type: Some(job_type.clone()),
            ..JobFilter::default()
        })
        .await
        .unwrap();
    let listed: Vec<_> = listed.iter().map(|j| j.id).collect();
    assert_eq!(listed, vec![ids[2], ids[3], ids[1], ids[0]]);

    let mut claimed = Vec::new();
    while let Some(job) = db.queue.claim(Some(&only)).await.unwrap() {
        claimed.push(job.id);
        db.queue.complete(job.id).await.unwrap();
    }
    assert_eq!(claimed, vec![ids[2], ids[1], ids[3], ids[0]]);
}

#[tokio::test]
async fn test_dedupe_is_atomic_under_concurrency() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let job_type = TestDb::job_type("auto_grade");
    let options = EnqueueOptions {
        dedupe: true,
        ..EnqueueOptions::default()
    };

    let mut handles = Vec::new();
    for _ in 0..16 {
        let queue = Arc::clone(&db.queue);
        let job_type = job_type.clone();
        let options = options.clone();
        handles.push(tokio::spawn(async move {
            queue
                .enqueue(&job_type, json!({"claim_ids": [1, 2]}), options)
                .await
                .unwrap()
                .id
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }
    assert_eq!(ids.len(), 1);

    let rows = db
        .queue
        .list(JobFilter {
            job_type: Some(job_type),
            ..JobFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_exclusive() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    let job_type = TestDb::job_type("summarize");
    for n in 0..10 {
        db.queue
            .enqueue(&job_type, json!({"n": n}), EnqueueOptions::default())
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..25 {
        let queue = Arc::clone(&db.queue);
        let only = vec![job_type.clone()];
        handles.push(tokio::spawn(async move {
            queue.claim(Some(&only)).await.unwrap().map(|job| job.id)
        }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        if let Some(id) = handle.await.unwrap() {
            claimed.push(id);
        }
    }
    let unique: HashSet<_> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), 10);
    assert_eq!(unique.len(), 10);
}

#[tokio::test]
async fn test_stale_claim_is_fenced_after_reap() {
    let Some(db) = TestDb::connect().await else {
        return;
    };
    // Start in the past so the reap cutoff stays behind other tests' claims.
    let clock = Arc::new(ManualClock::new(Utc::now() - Duration::hours(10)));
    let queue = db.manual_queue(clock.clone());
    let job_type = TestDb::job_type("summarize");
    let only = vec![job_type.clone()];
    let options = EnqueueOptions {
        max_attempts: Some(2),
        ..EnqueueOptions::default()
    };
    let job = queue.enqueue(&job_type, json!({}), options).await.unwrap();

    let first = queue.claim(Some(&only)).await.unwrap().unwrap();
    clock.advance(Duration::hours(2));
    let reaped = queue.reap_stale(Duration::hours(1)).await.unwrap();
    assert!(reaped.iter().any(|j| j.id == job.id));
    clock.advance(Duration::hours(2));
    let second = queue.claim(Some(&only)).await.unwrap().unwrap();
    assert_eq!(second.attempts, 2);

    assert_eq!(queue.fail(&first, "late", None).await.unwrap(), FailOutcome::Skipped);
    queue.complete_claim(&first, None).await.unwrap();
    let stored = queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(stored.attempts, 2);

    queue.complete_claim(&second, Some(json!({"ok": true}))).await.unwrap();
    let stored = queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Done);
    assert_eq!(stored.result, Some(json!({"ok": true})));
}
