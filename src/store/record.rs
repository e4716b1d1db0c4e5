//! On-disk shapes for job status records and batch definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lifecycle::{Job, JobStatus, Params};

/// Persisted snapshot of a [`Job`]. Once written it is the authoritative
/// answer for anyone outside the worker that owns the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: f64,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub written_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            progress: job.progress,
            result: job.result.clone(),
            error_message: job.error_message.clone(),
            params: job.params.clone(),
            written_at: Utc::now(),
        }
    }

    pub fn into_job(self) -> Job {
        Job {
            id: self.id,
            name: self.name,
            params: self.params,
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            progress: self.progress,
            result: self.result,
            error_message: self.error_message,
        }
    }
}

/// One job as listed in a batch definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub params: Params,
    pub created_at: DateTime<Utc>,
}

impl JobEntry {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            params: job.params.clone(),
            created_at: job.created_at,
        }
    }

    /// A fresh PENDING job carrying this entry's identity.
    pub fn to_job(&self) -> Job {
        Job::with_id(
            self.id.clone(),
            self.name.clone(),
            self.params.clone(),
            self.created_at,
        )
    }
}

/// Persisted batch layout, kept apart from per-job status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDefinition {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub jobs: Vec<JobEntry>,
    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub cancelled: bool,
}
