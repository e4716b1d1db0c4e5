//! Bounded-concurrency execution of jobs.
//!
//! A dispatch loop pulls jobs off an unbounded FIFO queue and runs each one
//! on a blocking thread while holding a semaphore permit, so at most
//! `max_concurrent` payloads execute at any instant.

mod cache;
mod payload;
mod runtime;

pub use payload::{Payload, from_fn};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::lifecycle::{Job, JobStatus};
use crate::store::{Lookup, StatusStore};
use cache::CompletedCache;

/// Sizing for a [`WorkerPool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_concurrent: usize,
    pub completed_cache_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            completed_cache_capacity: 1000,
        }
    }
}

/// Point-in-time counts of jobs the pool knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub queued: usize,
    pub running: usize,
    pub max_concurrent: usize,
}

/// Where a submitted job sits inside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Queued,
    Running,
    Cancelled,
}

pub(crate) struct QueuedJob {
    job: Job,
    payload: Arc<dyn Payload>,
}

/// State shared by the dispatch loop, the workers and the consumer-facing
/// accessors. Each map sits behind its own mutex; none is ever handed out.
struct Shared {
    store: Arc<StatusStore>,
    slots: Mutex<HashMap<String, Slot>>,
    completed: Mutex<CompletedCache>,
}

impl Shared {
    /// Drop the slot of a cancelled job once it leaves the queue and keep a
    /// CANCELLED copy in the completed cache instead. False if the job was
    /// not cancelled.
    fn retire_cancelled(&self, job: &Job) -> bool {
        let mut slots = lock(&self.slots);
        if slots.get(&job.id) != Some(&Slot::Cancelled) {
            return false;
        }
        slots.remove(&job.id);
        let mut cancelled = job.clone();
        if cancelled.cancel().is_ok() {
            lock(&self.completed).insert(cancelled);
        }
        true
    }

    /// QUEUED → RUNNING in the slot table. False if the job was cancelled.
    fn claim(&self, job_id: &str) -> bool {
        match lock(&self.slots).get_mut(job_id) {
            Some(slot) if *slot == Slot::Queued => {
                *slot = Slot::Running;
                true
            }
            _ => false,
        }
    }

    fn release(&self, job_id: &str) {
        lock(&self.slots).remove(job_id);
    }

    /// Cache first, then free the slot, so a finished job is always visible
    /// through one of the two.
    fn finish(&self, job: Job) {
        let job_id = job.id.clone();
        lock(&self.completed).insert(job);
        self.release(&job_id);
    }

    fn lookup(&self, job_id: &str) -> Lookup {
        match self.store.lookup(job_id) {
            Lookup::Found(job) => Lookup::Found(job),
            fallback => match lock(&self.completed).get(job_id) {
                Some(job) => Lookup::Found(job.clone()),
                None => fallback,
            },
        }
    }
}

/// Error for submitting a job the pool has already seen finish.
fn already_finished(job: &Job) -> EngineError {
    match job.status {
        JobStatus::Cancelled => EngineError::JobCancelled(job.id.clone()),
        status => EngineError::InvalidTransition {
            job_id: job.id.clone(),
            from: status,
            to: JobStatus::Running,
        },
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    queue_tx: Mutex<Option<mpsc::UnboundedSender<QueuedJob>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    max_concurrent: usize,
}

impl WorkerPool {
    /// Start the dispatch loop on the current tokio runtime.
    pub fn start(store: Arc<StatusStore>, mut config: PoolConfig) -> Self {
        config.max_concurrent = config.max_concurrent.max(1);

        let shared = Arc::new(Shared {
            store,
            slots: Mutex::new(HashMap::new()),
            completed: Mutex::new(CompletedCache::new(config.completed_cache_capacity)),
        });
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let dispatcher =
            runtime::spawn_dispatch_loop(Arc::clone(&shared), queue_rx, config.max_concurrent);
        info!(max_concurrent = config.max_concurrent, "worker pool started");

        Self {
            shared,
            queue_tx: Mutex::new(Some(queue_tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
            max_concurrent: config.max_concurrent,
        }
    }

    /// Queue a PENDING job. Never waits for a free slot.
    pub fn submit(&self, job: Job, payload: Arc<dyn Payload>) -> Result<(), EngineError> {
        if job.status != JobStatus::Pending {
            return Err(EngineError::InvalidTransition {
                job_id: job.id,
                from: job.status,
                to: JobStatus::Running,
            });
        }

        if let Some(known) = self.shared.store.read(&job.id)
            && known.status != JobStatus::Pending
        {
            return Err(already_finished(&known));
        }

        {
            let mut slots = lock(&self.shared.slots);
            match slots.get(&job.id) {
                Some(Slot::Queued | Slot::Running) => {
                    return Err(EngineError::JobAlreadyActive(job.id));
                }
                Some(Slot::Cancelled) => return Err(EngineError::JobCancelled(job.id)),
                None => {
                    if let Some(known) = lock(&self.shared.completed).get(&job.id) {
                        return Err(already_finished(known));
                    }
                    slots.insert(job.id.clone(), Slot::Queued);
                }
            }
        }

        let job_id = job.id.clone();
        let sent = match lock(&self.queue_tx).as_ref() {
            Some(tx) => tx.send(QueuedJob { job, payload }).is_ok(),
            None => false,
        };
        if !sent {
            self.shared.release(&job_id);
            return Err(EngineError::PoolClosed);
        }
        debug!(%job_id, "job queued");
        Ok(())
    }

    /// Cancel a job that has not started yet.
    ///
    /// Writes a CANCELLED record built from the caller's PENDING copy and
    /// returns true. Running or finished jobs are left alone.
    ///
    /// A queued job keeps a cancelled slot until the dispatcher dequeues it.
    /// A job that was never queued goes straight to the completed cache, so
    /// the slot table only ever holds jobs that are still in the queue or
    /// running.
    pub fn cancel(&self, job: &Job) -> bool {
        let mut cancelled = job.clone();
        if cancelled.cancel().is_err() {
            return false;
        }

        {
            let mut slots = lock(&self.shared.slots);
            match slots.get(&job.id) {
                Some(Slot::Running | Slot::Cancelled) => return false,
                Some(Slot::Queued) => {
                    slots.insert(job.id.clone(), Slot::Cancelled);
                }
                None => {
                    // Not queued here: it either never was, or it already finished.
                    if self
                        .shared
                        .lookup(&job.id)
                        .found()
                        .is_some_and(|known| known.status != JobStatus::Pending)
                    {
                        return false;
                    }
                    lock(&self.shared.completed).insert(cancelled.clone());
                }
            }
        }

        self.shared.store.write(&cancelled);
        debug!(job_id = %job.id, "job cancelled");
        true
    }

    /// Current state of a job; the store record wins over the in-memory cache.
    pub fn get_status(&self, job_id: &str) -> Option<Job> {
        self.lookup(job_id).found()
    }

    pub fn lookup(&self, job_id: &str) -> Lookup {
        self.shared.lookup(job_id)
    }

    pub fn stats(&self) -> PoolStats {
        let slots = lock(&self.shared.slots);
        PoolStats {
            queued: slots.values().filter(|s| **s == Slot::Queued).count(),
            running: slots.values().filter(|s| **s == Slot::Running).count(),
            max_concurrent: self.max_concurrent,
        }
    }

    /// Drop every trace of finished or cancelled jobs kept in memory.
    pub fn forget<'a>(&self, job_ids: impl IntoIterator<Item = &'a str>) {
        let mut slots = lock(&self.shared.slots);
        let mut completed = lock(&self.shared.completed);
        for job_id in job_ids {
            if slots.get(job_id) == Some(&Slot::Cancelled) {
                slots.remove(job_id);
            }
            completed.remove(job_id);
        }
    }

    /// Stop accepting jobs, let the queue drain and wait for every worker.
    pub async fn shutdown(&self) {
        lock(&self.queue_tx).take();
        let dispatcher = lock(&self.dispatcher).take();
        if let Some(dispatcher) = dispatcher
            && let Err(e) = dispatcher.await
        {
            tracing::error!("dispatch loop crashed: {e}");
        }
        info!("worker pool stopped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
