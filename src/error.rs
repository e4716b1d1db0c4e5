use thiserror::Error;

use crate::lifecycle::JobStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Batch {0} has already been started")]
    BatchAlreadyStarted(String),

    #[error("Batch {0} was cancelled")]
    BatchCancelled(String),

    #[error("Batch {0} still has running jobs")]
    BatchBusy(String),

    #[error("A batch needs at least one job")]
    EmptyBatch,

    #[error("Job {0} is already queued or running")]
    JobAlreadyActive(String),

    #[error("Job {0} was cancelled")]
    JobCancelled(String),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Invalid record key: {0:?}")]
    InvalidKey(String),

    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
