//! Concurrent batch execution with a durable status handoff.
//!
//! Workers run jobs on a bounded pool and mirror every lifecycle transition
//! into a [`StatusStore`](store::StatusStore). Consumers poll
//! [`BatchManager::get_batch_status`](batch::BatchManager::get_batch_status)
//! and only ever receive copies rebuilt from those records.

pub mod batch;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod pool;
pub mod store;
pub mod ui;

pub use batch::{Batch, BatchManager, BatchStatus, FailurePolicy};
pub use error::EngineError;
pub use lifecycle::{Job, JobSpec, JobStatus, Params};
pub use pool::{Payload, PoolConfig, WorkerPool, from_fn};
pub use store::{Lookup, StatusStore};
