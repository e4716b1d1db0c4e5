//! Named groups of jobs submitted and queried together.

mod status;

pub use status::{Batch, BatchStatus, BatchSummary, FailurePolicy, StatusCounts, aggregate};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::lifecycle::{Job, JobSpec, JobStatus};
use crate::pool::{Payload, WorkerPool};
use crate::store::{BatchDefinition, JobEntry, Lookup, StatusStore};

struct BatchEntry {
    definition: BatchDefinition,
    /// Submitted to the pool by this process.
    dispatched: bool,
}

/// Owns batch definitions and answers aggregate status queries.
///
/// All methods are safe to call from the consumer thread: status queries
/// read through the pool and store and never touch a job a worker owns.
pub struct BatchManager {
    store: Arc<StatusStore>,
    pool: Arc<WorkerPool>,
    policy: FailurePolicy,
    batches: Mutex<HashMap<String, BatchEntry>>,
}

impl BatchManager {
    /// Reload every batch definition persisted in `store`.
    pub fn open(store: Arc<StatusStore>, pool: Arc<WorkerPool>, policy: FailurePolicy) -> Self {
        let batches: HashMap<String, BatchEntry> = store
            .list_batches()
            .into_iter()
            .map(|definition| {
                let entry = BatchEntry {
                    definition,
                    dispatched: false,
                };
                (entry.definition.id.clone(), entry)
            })
            .collect();
        if !batches.is_empty() {
            info!(count = batches.len(), "reloaded batch definitions");
        }

        Self {
            store,
            pool,
            policy,
            batches: Mutex::new(batches),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Build PENDING jobs from `specs` and persist the batch definition.
    pub fn create_batch(
        &self,
        specs: Vec<JobSpec>,
        name: impl Into<String>,
    ) -> Result<String, EngineError> {
        if specs.is_empty() {
            return Err(EngineError::EmptyBatch);
        }

        let jobs: Vec<Job> = specs.into_iter().map(Job::from_spec).collect();
        let definition = BatchDefinition {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now(),
            jobs: jobs.iter().map(JobEntry::from_job).collect(),
            started: false,
            cancelled: false,
        };
        self.store.write_batch(&definition)?;

        let batch_id = definition.id.clone();
        info!(%batch_id, name = %definition.name, jobs = definition.jobs.len(), "batch created");
        self.lock_batches().insert(
            batch_id.clone(),
            BatchEntry {
                definition,
                dispatched: false,
            },
        );
        Ok(batch_id)
    }

    /// Submit every job still PENDING to the pool with one shared payload.
    /// Returns how many were submitted.
    pub fn start_batch(
        &self,
        batch_id: &str,
        payload: Arc<dyn Payload>,
    ) -> Result<usize, EngineError> {
        let definition = {
            let mut batches = self.lock_batches();
            let entry = batches
                .get_mut(batch_id)
                .ok_or_else(|| EngineError::BatchNotFound(batch_id.to_string()))?;
            if entry.dispatched {
                return Err(EngineError::BatchAlreadyStarted(batch_id.to_string()));
            }
            if entry.definition.cancelled {
                return Err(EngineError::BatchCancelled(batch_id.to_string()));
            }
            entry.dispatched = true;
            entry.definition.started = true;
            entry.definition.clone()
        };
        if let Err(e) = self.store.write_batch(&definition) {
            warn!(%batch_id, error = %e, "failed to persist batch start");
        }

        let mut submitted = 0;
        for entry in &definition.jobs {
            if let Lookup::Found(job) = self.pool.lookup(&entry.id)
                && job.status != JobStatus::Pending
            {
                debug!(job_id = %entry.id, status = %job.status, "job already past PENDING");
                continue;
            }
            match self.pool.submit(entry.to_job(), Arc::clone(&payload)) {
                Ok(()) => submitted += 1,
                Err(EngineError::PoolClosed) => {
                    self.undo_start(batch_id, submitted > 0);
                    return Err(EngineError::PoolClosed);
                }
                Err(e) => debug!(job_id = %entry.id, error = %e, "job not submitted"),
            }
        }

        info!(%batch_id, submitted, "batch started");
        Ok(submitted)
    }

    /// Current snapshot of a batch, built from fresh copies of each job.
    ///
    /// Records are read newest submission first. Jobs take permits in
    /// submission order, so every job seen RUNNING after the first one
    /// already held its permit at that earlier read, and the snapshot never
    /// counts more RUNNING jobs than the pool has permits.
    pub fn get_batch_status(&self, batch_id: &str) -> Result<Batch, EngineError> {
        let definition = self.definition(batch_id)?;

        let mut degraded = Vec::new();
        let mut jobs: Vec<Job> = definition
            .jobs
            .iter()
            .rev()
            .map(|entry| match self.pool.lookup(&entry.id) {
                Lookup::Found(job) => job,
                Lookup::Missing => entry.to_job(),
                Lookup::Corrupt => {
                    degraded.push(entry.id.clone());
                    entry.to_job()
                }
            })
            .collect();
        jobs.reverse();
        degraded.reverse();

        let counts = StatusCounts::tally(jobs.iter().map(|job| &job.status));
        let status = aggregate(&counts, definition.started, definition.cancelled, self.policy);
        Ok(Batch {
            id: definition.id,
            name: definition.name,
            created_at: definition.created_at,
            status,
            counts,
            jobs,
            degraded,
        })
    }

    /// Cancel every job that has not started yet. Running jobs finish on
    /// their own. Returns how many jobs were cancelled.
    pub fn cancel_batch(&self, batch_id: &str) -> Result<usize, EngineError> {
        let snapshot = self.get_batch_status(batch_id)?;
        let cancelled = self.cancel_pending(&snapshot);

        let unfinished = snapshot.counts.pending + snapshot.counts.running > 0;
        if unfinished {
            self.mark_cancelled(batch_id);
        }
        info!(%batch_id, cancelled, "batch cancelled");
        Ok(cancelled)
    }

    /// Remove a batch, its definition and its status records.
    ///
    /// Pending jobs are cancelled first. Refuses while any job is running.
    pub fn delete_batch(&self, batch_id: &str) -> Result<(), EngineError> {
        let snapshot = self.get_batch_status(batch_id)?;
        if snapshot.counts.running > 0 {
            return Err(EngineError::BatchBusy(batch_id.to_string()));
        }

        let pending = snapshot.counts.pending;
        if self.cancel_pending(&snapshot) < pending {
            // Something started between the snapshot and the cancel.
            self.mark_cancelled(batch_id);
            return Err(EngineError::BatchBusy(batch_id.to_string()));
        }

        for job in &snapshot.jobs {
            if let Err(e) = self.store.remove(&job.id) {
                warn!(job_id = %job.id, error = %e, "failed to remove status record");
            }
        }
        self.pool.forget(snapshot.jobs.iter().map(|job| job.id.as_str()));
        self.store.remove_batch(batch_id)?;
        self.lock_batches().remove(batch_id);
        info!(%batch_id, "batch deleted");
        Ok(())
    }

    /// Every known batch, oldest first.
    pub fn list_batches(&self) -> Vec<BatchSummary> {
        let mut definitions: HashMap<String, BatchDefinition> = self
            .store
            .list_batches()
            .into_iter()
            .map(|definition| (definition.id.clone(), definition))
            .collect();
        for (id, entry) in self.lock_batches().iter() {
            definitions.insert(id.clone(), entry.definition.clone());
        }

        let mut summaries: Vec<BatchSummary> = definitions
            .into_values()
            .map(|definition| BatchSummary {
                job_count: definition.jobs.len(),
                id: definition.id,
                name: definition.name,
                created_at: definition.created_at,
                started: definition.started,
                cancelled: definition.cancelled,
            })
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// In-memory definition, falling back to one persisted by another process.
    fn definition(&self, batch_id: &str) -> Result<BatchDefinition, EngineError> {
        if let Some(entry) = self.lock_batches().get(batch_id) {
            return Ok(entry.definition.clone());
        }
        self.store
            .read_batch(batch_id)
            .found()
            .ok_or_else(|| EngineError::BatchNotFound(batch_id.to_string()))
    }

    fn cancel_pending(&self, snapshot: &Batch) -> usize {
        snapshot
            .jobs
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .filter(|job| self.pool.cancel(job))
            .count()
    }

    fn mark_cancelled(&self, batch_id: &str) {
        let definition = {
            let mut batches = self.lock_batches();
            match batches.get_mut(batch_id) {
                Some(entry) => {
                    entry.definition.cancelled = true;
                    entry.definition.clone()
                }
                None => match self.store.read_batch(batch_id).found() {
                    Some(mut definition) => {
                        definition.cancelled = true;
                        batches.insert(
                            batch_id.to_string(),
                            BatchEntry {
                                definition: definition.clone(),
                                dispatched: false,
                            },
                        );
                        definition
                    }
                    None => return,
                },
            }
        };
        if let Err(e) = self.store.write_batch(&definition) {
            warn!(%batch_id, error = %e, "failed to persist batch cancellation");
        }
    }

    /// Let a batch be started again after the pool refused its jobs. It
    /// stays marked as started if some jobs were already queued.
    fn undo_start(&self, batch_id: &str, partly_submitted: bool) {
        let definition = {
            let mut batches = self.lock_batches();
            let Some(entry) = batches.get_mut(batch_id) else {
                return;
            };
            entry.dispatched = false;
            entry.definition.started = partly_submitted;
            entry.definition.clone()
        };
        if let Err(e) = self.store.write_batch(&definition) {
            warn!(%batch_id, error = %e, "failed to persist batch start");
        }
    }

    fn lock_batches(&self) -> MutexGuard<'_, HashMap<String, BatchEntry>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Params;
    use crate::pool::{PoolConfig, from_fn};
    use crate::store::{AdvisoryLock, DEFAULT_RETENTION};
    use anyhow::anyhow;
    use serde_json::{Value, json};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        store: Arc<StatusStore>,
        manager: BatchManager,
    }

    fn harness(max_concurrent: usize, policy: FailurePolicy) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            StatusStore::open(dir.path(), DEFAULT_RETENTION, Arc::new(AdvisoryLock::default()))
                .unwrap(),
        );
        let pool = Arc::new(WorkerPool::start(
            Arc::clone(&store),
            PoolConfig {
                max_concurrent,
                ..Default::default()
            },
        ));
        let manager = BatchManager::open(Arc::clone(&store), pool, policy);
        Harness {
            dir,
            store,
            manager,
        }
    }

    fn specs(n: usize) -> Vec<JobSpec> {
        (0..n)
            .map(|i| {
                let mut params = Params::new();
                params.insert("index".into(), json!(i));
                JobSpec::new(format!("job-{i}"), params)
            })
            .collect()
    }

    async fn wait_finished(manager: &BatchManager, batch_id: &str, timeout: Duration) -> Batch {
        let deadline = Instant::now() + timeout;
        loop {
            let batch = manager.get_batch_status(batch_id).unwrap();
            if batch.status.is_terminal() {
                return batch;
            }
            assert!(Instant::now() < deadline, "batch still {} after {timeout:?}", batch.status);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn new_batch_is_pending() {
        let h = harness(2, FailurePolicy::AnyFailed);
        let id = h.manager.create_batch(specs(3), "fresh").unwrap();

        let batch = h.manager.get_batch_status(&id).unwrap();
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.name, "fresh");
        assert_eq!(batch.counts.pending, 3);
        let names: Vec<&str> = batch.jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["job-0", "job-1", "job-2"]);
        assert_eq!(batch.progress(), 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_and_unknown_batches_are_rejected() {
        let h = harness(1, FailurePolicy::AnyFailed);
        assert!(matches!(
            h.manager.create_batch(Vec::new(), "empty"),
            Err(EngineError::EmptyBatch)
        ));
        assert!(matches!(
            h.manager.get_batch_status("nope"),
            Err(EngineError::BatchNotFound(_))
        ));
        assert!(matches!(
            h.manager.start_batch("nope", from_fn(|_| Ok(Value::Null))),
            Err(EngineError::BatchNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn three_jobs_two_slots_all_complete() {
        let h = harness(2, FailurePolicy::AnyFailed);
        let id = h.manager.create_batch(specs(3), "sleepy").unwrap();
        let payload = from_fn(|_| {
            std::thread::sleep(Duration::from_millis(100));
            Ok(json!({"ok": true}))
        });

        let started = Instant::now();
        assert_eq!(h.manager.start_batch(&id, payload).unwrap(), 3);

        // Two slots for three 100ms jobs: not done before the second round,
        // done by 250ms.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let halfway = h.manager.get_batch_status(&id).unwrap();
        assert_eq!(halfway.status, BatchStatus::Running);
        assert!(halfway.counts.completed < 3);

        tokio::time::sleep(Duration::from_millis(250).saturating_sub(started.elapsed())).await;
        let batch = h.manager.get_batch_status(&id).unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.counts.completed, 3);
        for job in &batch.jobs {
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.result, Some(json!({"ok": true})));
            assert_eq!(job.progress, 1.0);
        }
        assert_eq!(batch.progress(), 1.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_payload_surfaces_as_data() {
        let h = harness(2, FailurePolicy::AnyFailed);
        let id = h.manager.create_batch(specs(1), "doomed").unwrap();
        h.manager
            .start_batch(&id, from_fn(|_| Err(anyhow!("ValueError: bad input"))))
            .unwrap();

        let batch = wait_finished(&h.manager, &id, Duration::from_secs(2)).await;
        assert_eq!(batch.status, BatchStatus::Failed);
        let job = &batch.jobs[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.as_deref().unwrap().contains("bad input"));
        assert!(job.result.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn mixed_outcomes_follow_policy() {
        let h = harness(2, FailurePolicy::Partial);
        let id = h.manager.create_batch(specs(4), "mixed").unwrap();
        let payload = from_fn(|params| match params["index"].as_u64() {
            Some(0) => Err(anyhow!("first one fails")),
            _ => Ok(Value::Null),
        });
        h.manager.start_batch(&id, payload).unwrap();

        let batch = wait_finished(&h.manager, &id, Duration::from_secs(2)).await;
        assert_eq!(batch.status, BatchStatus::Partial);
        assert_eq!(batch.counts.failed, 1);
        assert_eq!(batch.counts.completed, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_before_start_never_runs_payload() {
        let h = harness(2, FailurePolicy::AnyFailed);
        let id = h.manager.create_batch(specs(5), "abandoned").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let payload = {
            let calls = Arc::clone(&calls);
            from_fn(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            })
        };

        assert_eq!(h.manager.cancel_batch(&id).unwrap(), 5);
        assert!(matches!(
            h.manager.start_batch(&id, payload),
            Err(EngineError::BatchCancelled(_))
        ));

        let batch = h.manager.get_batch_status(&id).unwrap();
        assert_eq!(batch.status, BatchStatus::Cancelled);
        assert_eq!(batch.counts.cancelled, 5);
        assert!(batch.jobs.iter().all(|j| j.status == JobStatus::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_stops_queued_jobs_but_not_running_ones() {
        let h = harness(1, FailurePolicy::AnyFailed);
        let id = h.manager.create_batch(specs(4), "halfway").unwrap();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let calls = Arc::new(AtomicUsize::new(0));
        let payload = {
            let calls = Arc::clone(&calls);
            from_fn(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let _ = release_rx.lock().unwrap().recv();
                Ok(json!("done"))
            })
        };
        h.manager.start_batch(&id, payload).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while h.manager.get_batch_status(&id).unwrap().counts.running == 0 {
            assert!(Instant::now() < deadline, "first job never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(h.manager.cancel_batch(&id).unwrap(), 3);
        assert_eq!(h.manager.get_batch_status(&id).unwrap().status, BatchStatus::Running);

        release_tx.send(()).unwrap();
        let batch = wait_finished(&h.manager, &id, Duration::from_secs(2)).await;
        assert_eq!(batch.status, BatchStatus::Cancelled);
        assert_eq!(batch.counts.completed, 1);
        assert_eq!(batch.counts.cancelled, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn batch_cannot_start_twice() {
        let h = harness(2, FailurePolicy::AnyFailed);
        let id = h.manager.create_batch(specs(2), "once").unwrap();
        h.manager.start_batch(&id, from_fn(|_| Ok(Value::Null))).unwrap();
        assert!(matches!(
            h.manager.start_batch(&id, from_fn(|_| Ok(Value::Null))),
            Err(EngineError::BatchAlreadyStarted(_))
        ));
        wait_finished(&h.manager, &id, Duration::from_secs(2)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn observed_status_sequences_are_monotonic() {
        let h = harness(2, FailurePolicy::AnyFailed);
        let id = h.manager.create_batch(specs(6), "observed").unwrap();
        let payload = from_fn(|params| {
            std::thread::sleep(Duration::from_millis(20));
            match params["index"].as_u64() {
                Some(n) if n % 3 == 0 => Err(anyhow!("job {n} refused")),
                _ => Ok(Value::Null),
            }
        });
        h.manager.start_batch(&id, payload).unwrap();

        let mut seen: HashMap<String, Vec<JobStatus>> = HashMap::new();
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let batch = h.manager.get_batch_status(&id).unwrap();
            for job in &batch.jobs {
                let history = seen.entry(job.id.clone()).or_insert_with(|| vec![JobStatus::Pending]);
                if history.last() != Some(&job.status) {
                    history.push(job.status);
                }
            }
            if batch.status.is_terminal() {
                break;
            }
            assert!(Instant::now() < deadline, "batch did not finish");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let rank = |s: &JobStatus| match s {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            _ => 2,
        };
        for (job_id, history) in &seen {
            assert!(
                history.windows(2).all(|w| rank(&w[0]) < rank(&w[1])),
                "{job_id} went {history:?}"
            );
            assert!(history.last().unwrap().is_terminal(), "{job_id} went {history:?}");
        }
        let final_batch = h.manager.get_batch_status(&id).unwrap();
        for job in &final_batch.jobs {
            assert!(job.started_at.is_some(), "{} finished without running", job.id);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn snapshots_never_show_more_running_than_slots() {
        let h = harness(3, FailurePolicy::AnyFailed);
        let id = h.manager.create_batch(specs(20), "crowded").unwrap();
        let payload = from_fn(|_| {
            std::thread::sleep(Duration::from_millis(15));
            Ok(Value::Null)
        });
        h.manager.start_batch(&id, payload).unwrap();

        let mut peak = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let batch = h.manager.get_batch_status(&id).unwrap();
            peak = peak.max(batch.counts.running);
            assert!(batch.counts.running <= 3, "saw {} running", batch.counts.running);
            if batch.status.is_terminal() {
                break;
            }
            assert!(Instant::now() < deadline, "batch did not finish");
            tokio::task::yield_now().await;
        }
        assert!(peak >= 1);
        assert_eq!(h.manager.get_batch_status(&id).unwrap().counts.completed, 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_can_be_retried_after_pool_refusal() {
        let h = harness(1, FailurePolicy::AnyFailed);
        let id = h.manager.create_batch(specs(2), "refused").unwrap();
        h.manager.pool().shutdown().await;

        for _ in 0..2 {
            assert!(matches!(
                h.manager.start_batch(&id, from_fn(|_| Ok(Value::Null))),
                Err(EngineError::PoolClosed)
            ));
        }
        assert_eq!(h.manager.get_batch_status(&id).unwrap().status, BatchStatus::Pending);
        assert!(!h.store.read_batch(&id).found().unwrap().started);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn corrupt_record_is_reported_as_degraded() {
        let h = harness(1, FailurePolicy::AnyFailed);
        let id = h.manager.create_batch(specs(2), "damaged").unwrap();
        let victim = h.manager.get_batch_status(&id).unwrap().jobs[1].id.clone();
        std::fs::write(h.dir.path().join(format!("jobs/{victim}.json")), b"not json").unwrap();

        let batch = h.manager.get_batch_status(&id).unwrap();
        assert_eq!(batch.degraded, vec![victim.clone()]);
        assert_eq!(batch.job(&victim).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delete_removes_definition_and_records() {
        let h = harness(2, FailurePolicy::AnyFailed);
        let id = h.manager.create_batch(specs(2), "short-lived").unwrap();
        h.manager.start_batch(&id, from_fn(|_| Ok(Value::Null))).unwrap();
        let batch = wait_finished(&h.manager, &id, Duration::from_secs(2)).await;

        h.manager.delete_batch(&id).unwrap();
        assert!(matches!(
            h.manager.get_batch_status(&id),
            Err(EngineError::BatchNotFound(_))
        ));
        for job in &batch.jobs {
            assert!(h.store.read(&job.id).is_none());
            assert!(h.manager.pool().get_status(&job.id).is_none());
        }
        assert!(h.manager.list_batches().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delete_refuses_while_running() {
        let h = harness(1, FailurePolicy::AnyFailed);
        let id = h.manager.create_batch(specs(1), "busy").unwrap();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        h.manager
            .start_batch(
                &id,
                from_fn(move |_| {
                    let _ = release_rx.lock().unwrap().recv();
                    Ok(Value::Null)
                }),
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while h.manager.get_batch_status(&id).unwrap().counts.running == 0 {
            assert!(Instant::now() < deadline, "job never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(matches!(h.manager.delete_batch(&id), Err(EngineError::BatchBusy(_))));

        release_tx.send(()).unwrap();
        wait_finished(&h.manager, &id, Duration::from_secs(2)).await;
        h.manager.delete_batch(&id).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn definitions_survive_a_restart() {
        let h = harness(2, FailurePolicy::AnyFailed);
        let first = h.manager.create_batch(specs(2), "first").unwrap();
        let second = h.manager.create_batch(specs(1), "second").unwrap();
        h.manager.start_batch(&first, from_fn(|_| Ok(json!(1)))).unwrap();
        wait_finished(&h.manager, &first, Duration::from_secs(2)).await;

        let pool = Arc::new(WorkerPool::start(Arc::clone(&h.store), PoolConfig::default()));
        let reopened = BatchManager::open(Arc::clone(&h.store), pool, FailurePolicy::AnyFailed);

        let ids: HashSet<String> = reopened.list_batches().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, HashSet::from([first.clone(), second.clone()]));
        assert_eq!(
            reopened.get_batch_status(&first).unwrap().status,
            BatchStatus::Completed
        );

        // Finished jobs are not run again; untouched batches still start.
        assert_eq!(reopened.start_batch(&first, from_fn(|_| Ok(json!(2)))).unwrap(), 0);
        assert_eq!(reopened.start_batch(&second, from_fn(|_| Ok(json!(3)))).unwrap(), 1);
        let batch = wait_finished(&reopened, &second, Duration::from_secs(2)).await;
        assert_eq!(batch.jobs[0].result, Some(json!(3)));
    }
}
