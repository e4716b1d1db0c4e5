use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::{QueuedJob, Shared};
use crate::lifecycle::JobStatus;

/// Pull queued jobs in FIFO order and run each on a blocking thread while
/// holding one of `max_concurrent` permits.
pub(super) fn spawn_dispatch_loop(
    shared: Arc<Shared>,
    mut queue_rx: mpsc::UnboundedReceiver<QueuedJob>,
    max_concurrent: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut workers = JoinSet::new();

        while let Some(queued) = queue_rx.recv().await {
            if shared.retire_cancelled(&queued.job) {
                debug!(job_id = %queued.job.id, "skipping cancelled job");
                continue;
            }
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let worker_shared = Arc::clone(&shared);
            workers.spawn(async move {
                let _permit = permit;
                let job_id = queued.job.id.clone();
                let run = tokio::task::spawn_blocking(move || worker_shared.execute(queued));
                if let Err(error) = run.await {
                    error!(%job_id, "job worker crashed: {error}");
                }
            });

            while let Some(result) = workers.try_join_next() {
                if let Err(error) = result {
                    error!("job worker task failed: {error}");
                }
            }
        }

        while let Some(result) = workers.join_next().await {
            if let Err(error) = result {
                error!("job worker task failed: {error}");
            }
        }
        debug!("dispatch loop stopped");
    })
}

impl Shared {
    /// Run one job start to finish on the current (blocking) thread.
    ///
    /// The job is owned by this call: every mutation happens here and is then
    /// mirrored to the store.
    pub(super) fn execute(&self, queued: QueuedJob) {
        let QueuedJob { mut job, payload } = queued;
        if !self.claim(&job.id) {
            self.retire_cancelled(&job);
            debug!(job_id = %job.id, "job cancelled before it started");
            return;
        }

        if let Err(e) = job.start() {
            warn!(job_id = %job.id, error = %e, "refusing to run job");
            self.release(&job.id);
            return;
        }
        self.store.write(&job);
        debug!(job_id = %job.id, name = %job.name, "job started");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| payload.run(&job.params)));
        let finished = match outcome {
            Ok(Ok(value)) => job.complete(value),
            Ok(Err(e)) => job.fail(format!("{e:#}")),
            Err(panic) => job.fail(format!("payload panicked: {}", panic_message(&*panic))),
        };
        if let Err(e) = finished {
            warn!(job_id = %job.id, error = %e, "unexpected job transition");
        }
        self.store.write(&job);

        match job.status {
            JobStatus::Completed => debug!(job_id = %job.id, "job completed"),
            _ => info!(
                job_id = %job.id,
                error = job.error_message.as_deref().unwrap_or_default(),
                "job failed"
            ),
        }
        self.finish(job);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
