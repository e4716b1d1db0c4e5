use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::status::JobStatus;
use crate::error::EngineError;

/// Opaque key-value bag handed to a payload.
pub type Params = serde_json::Map<String, Value>;

/// What a caller provides to describe one job of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    #[serde(default)]
    pub params: Params,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, params: Params) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// A single unit of work and its current lifecycle state.
///
/// A `Job` is only ever mutated by the worker that owns it. Everyone else
/// sees copies rebuilt from the status store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub params: Params,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub result: Option<Value>,
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(name: impl Into<String>, params: Params) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name, params, Utc::now())
    }

    /// Rebuild a PENDING job with a known identity, e.g. from a batch definition.
    pub fn with_id(
        id: String,
        name: impl Into<String>,
        params: Params,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            params,
            status: JobStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            progress: 0.0,
            result: None,
            error_message: None,
        }
    }

    pub fn from_spec(spec: JobSpec) -> Self {
        Self::new(spec.name, spec.params)
    }

    /// PENDING → RUNNING.
    pub fn start(&mut self) -> Result<(), EngineError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        self.progress = 0.0;
        Ok(())
    }

    /// RUNNING → COMPLETED with the payload's return value.
    pub fn complete(&mut self, result: Value) -> Result<(), EngineError> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        self.progress = 1.0;
        Ok(())
    }

    /// RUNNING → FAILED with the stringified payload error.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), EngineError> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// PENDING → CANCELLED.
    pub fn cancel(&mut self) -> Result<(), EngineError> {
        self.transition(JobStatus::Cancelled)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
