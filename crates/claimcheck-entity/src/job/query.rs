//! Listing filters, orderings and aggregate counts.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use claimcheck_core::types::PageWindow;

use super::model::Job;
use super::status::JobStatus;

/// Row ordering for listings.
///
/// Claims always use [`JobOrder::Dispatch`]; dashboards default to
/// [`JobOrder::Admin`]. The two must not be conflated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOrder {
    /// `priority DESC, id DESC`: most important, most recent first.
    #[default]
    Admin,
    /// `priority DESC, run_at ASC, id ASC`: the order workers claim in.
    Dispatch,
}

impl JobOrder {
    /// SQL `ORDER BY` clause for this ordering.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Admin => "priority DESC, id DESC",
            Self::Dispatch => "priority DESC, run_at ASC, id ASC",
        }
    }

    /// Compare two jobs; `Less` sorts first.
    pub fn compare(&self, a: &Job, b: &Job) -> Ordering {
        match self {
            Self::Admin => b.priority.cmp(&a.priority).then(b.id.cmp(&a.id)),
            Self::Dispatch => b
                .priority
                .cmp(&a.priority)
                .then(a.run_at.cmp(&b.run_at))
                .then(a.id.cmp(&b.id)),
        }
    }
}

/// Exact-match filters plus a page window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Only jobs with this status.
    pub status: Option<JobStatus>,
    /// Only jobs with this type.
    pub job_type: Option<String>,
    /// Limit/offset window.
    #[serde(default)]
    pub window: PageWindow,
    /// Row ordering.
    #[serde(default)]
    pub order: JobOrder,
}

impl JobFilter {
    /// Check whether a job passes the status/type filters.
    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|status| job.status == status)
            && self
                .job_type
                .as_deref()
                .is_none_or(|job_type| job.job_type == job_type)
    }
}

/// Number of jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting to be claimed.
    pub queued: i64,
    /// Jobs currently claimed.
    pub running: i64,
    /// Jobs that finished successfully.
    pub done: i64,
    /// Jobs that failed permanently.
    pub failed: i64,
}

impl QueueStats {
    /// Add `count` jobs of `status`.
    pub fn record(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Queued => self.queued += count,
            JobStatus::Running => self.running += count,
            JobStatus::Done => self.done += count,
            JobStatus::Failed => self.failed += count,
        }
    }

    /// Total number of jobs.
    pub fn total(&self) -> i64 {
        self.queued + self.running + self.done + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::NewJob;
    use chrono::{Duration, Utc};
    use claimcheck_core::types::JobId;

    fn job(id: i64, priority: i32, run_offset_secs: i64) -> Job {
        let now = Utc::now();
        NewJob {
            job_type: "summarize".to_string(),
            payload: serde_json::json!({}),
            priority,
            run_at: now + Duration::seconds(run_offset_secs),
            max_attempts: 3,
            fingerprint: None,
            created_at: now,
        }
        .into_job(JobId(id))
    }

    #[test]
    fn test_dispatch_and_admin_orders() {
        let mut jobs = vec![job(1, 5, 10), job(2, 5, 0), job(3, 9, 0), job(4, 1, 0)];

        jobs.sort_by(|a, b| JobOrder::Dispatch.compare(a, b));
        let dispatch: Vec<i64> = jobs.iter().map(|j| j.id.get()).collect();
        assert_eq!(dispatch, vec![3, 2, 1, 4]);

        jobs.sort_by(|a, b| JobOrder::Admin.compare(a, b));
        let admin: Vec<i64> = jobs.iter().map(|j| j.id.get()).collect();
        assert_eq!(admin, vec![3, 2, 1, 4]);

        let mut tie = vec![job(1, 5, 0), job(2, 5, 0)];
        tie.sort_by(|a, b| JobOrder::Admin.compare(a, b));
        assert_eq!(tie[0].id, JobId(2));
        tie.sort_by(|a, b| JobOrder::Dispatch.compare(a, b));
        assert_eq!(tie[0].id, JobId(1));
    }

    #[test]
    fn test_filter_matches() {
        let filter = JobFilter {
            status: Some(JobStatus::Queued),
            job_type: Some("summarize".to_string()),
            ..JobFilter::default()
        };
        assert!(filter.matches(&job(1, 0, 0)));

        let other = JobFilter {
            job_type: Some("auto_grade".to_string()),
            ..JobFilter::default()
        };
        assert!(!other.matches(&job(1, 0, 0)));
    }

    #[test]
    fn test_stats_record() {
        let mut stats = QueueStats::default();
        stats.record(JobStatus::Queued, 2);
        stats.record(JobStatus::Failed, 1);
        assert_eq!(stats.total(), 3);
    }
}
