use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::{Job, JobStatus};

/// How a batch with failed jobs is summarised once every job has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// One failed job fails the whole batch.
    #[default]
    AnyFailed,
    /// Mixed outcomes report PARTIAL; only all-failed reports FAILED.
    Partial,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any_failed" => Ok(FailurePolicy::AnyFailed),
            "partial" => Ok(FailurePolicy::Partial),
            other => Err(format!("unknown failure policy: {other}")),
        }
    }
}

/// Aggregate state of a batch, derived from its jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BatchStatus::Pending | BatchStatus::Running)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Pending => write!(f, "PENDING"),
            BatchStatus::Running => write!(f, "RUNNING"),
            BatchStatus::Completed => write!(f, "COMPLETED"),
            BatchStatus::Failed => write!(f, "FAILED"),
            BatchStatus::Partial => write!(f, "PARTIAL"),
            BatchStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Number of jobs in each lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn tally<'a>(statuses: impl IntoIterator<Item = &'a JobStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            match status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.finished()
    }

    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

/// Derive a batch's status from its job counts.
///
/// - Anything running → RUNNING.
/// - Jobs still waiting → CANCELLED if the batch was cancelled, RUNNING once
///   started, PENDING before that.
/// - All finished → CANCELLED if the batch was cancelled, then failures per
///   `policy`, then CANCELLED if nothing completed, otherwise COMPLETED.
pub fn aggregate(
    counts: &StatusCounts,
    started: bool,
    cancelled: bool,
    policy: FailurePolicy,
) -> BatchStatus {
    if counts.running > 0 {
        return BatchStatus::Running;
    }
    if counts.pending > 0 {
        return if cancelled {
            BatchStatus::Cancelled
        } else if started {
            BatchStatus::Running
        } else {
            BatchStatus::Pending
        };
    }
    if cancelled {
        return BatchStatus::Cancelled;
    }
    if counts.failed > 0 {
        return match policy {
            FailurePolicy::Partial if counts.completed > 0 => BatchStatus::Partial,
            FailurePolicy::AnyFailed | FailurePolicy::Partial => BatchStatus::Failed,
        };
    }
    if counts.completed == 0 && counts.cancelled > 0 {
        return BatchStatus::Cancelled;
    }
    BatchStatus::Completed
}

/// Snapshot of a batch handed to the consumer. Every job is a copy.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub status: BatchStatus,
    pub counts: StatusCounts,
    pub jobs: Vec<Job>,
    /// Jobs whose status record exists but could not be parsed. They are
    /// reported as PENDING.
    pub degraded: Vec<String>,
}

impl Batch {
    /// Fraction of jobs that reached a terminal state.
    pub fn progress(&self) -> f64 {
        match self.counts.total() {
            0 => 1.0,
            total => self.counts.finished() as f64 / total as f64,
        }
    }

    pub fn job(&self, job_id: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == job_id)
    }
}

/// One line of `list_batches`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub job_count: usize,
    pub started: bool,
    pub cancelled: bool,
}
