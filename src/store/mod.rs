//! Durable handoff between workers and the consumer side.
//!
//! Workers write a [`StatusRecord`] per job; the consumer only ever reads
//! fresh copies back. Layout under the store root:
//!
//! ```text
//! jobs/<job_id>.json      status record
//! jobs/<job_id>.lock      advisory lock file
//! batches/<batch_id>.json batch definition
//! ```

mod atomic;
mod lock;
mod record;

pub use lock::{AdvisoryLock, LockGuard, NoLock, RecordLock, select_lock};
pub use record::{BatchDefinition, JobEntry, StatusRecord};

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::lifecycle::Job;
use atomic::{atomic_write, is_scratch_file};

/// Records older than this are purged when a store is opened.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

const JOBS_DIR: &str = "jobs";
const BATCHES_DIR: &str = "batches";
const MAX_KEY_LEN: usize = 128;

/// Outcome of reading one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T = Job> {
    Found(T),
    /// No record, or it could not be read.
    Missing,
    /// A record exists but does not parse.
    Corrupt,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Missing | Lookup::Corrupt => None,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Lookup::Corrupt)
    }
}

/// What a retention sweep deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub records: Vec<String>,
    pub batches: Vec<String>,
    pub scratch_files: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.records.len() + self.batches.len() + self.scratch_files
    }

    pub fn is_empty(&self) -> bool {
        self.removed() == 0
    }
}

#[derive(Debug)]
pub struct StatusStore {
    root: PathBuf,
    jobs_dir: PathBuf,
    batches_dir: PathBuf,
    lock: Arc<dyn RecordLock>,
}

impl StatusStore {
    /// Create the directory layout and purge records older than `max_age`.
    pub fn open(
        root: impl Into<PathBuf>,
        max_age: Duration,
        lock: Arc<dyn RecordLock>,
    ) -> Result<Self, EngineError> {
        let root = root.into();
        let jobs_dir = root.join(JOBS_DIR);
        let batches_dir = root.join(BATCHES_DIR);
        fs::create_dir_all(&jobs_dir)?;
        fs::create_dir_all(&batches_dir)?;

        let store = Self {
            root,
            jobs_dir,
            batches_dir,
            lock,
        };
        let report = store.sweep(max_age);
        info!(
            root = %store.root.display(),
            lock = store.lock.name(),
            removed = report.removed(),
            "status store opened"
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist the job's current fields. Failures are logged, never raised:
    /// losing a status write degrades observability, not execution.
    pub fn write(&self, job: &Job) {
        if let Err(e) = self.try_write(job) {
            warn!(job_id = %job.id, status = %job.status, error = %e, "failed to write status record");
        }
    }

    pub fn try_write(&self, job: &Job) -> Result<(), EngineError> {
        validate_key(&job.id)?;
        self.put(&self.jobs_dir, &job.id, &StatusRecord::from_job(job))?;
        debug!(job_id = %job.id, status = %job.status, "status record written");
        Ok(())
    }

    /// The stored job, or `None` when it is missing, unreadable or corrupt.
    pub fn read(&self, job_id: &str) -> Option<Job> {
        self.lookup(job_id).found()
    }

    pub fn lookup(&self, job_id: &str) -> Lookup {
        match self.get::<StatusRecord>(&self.jobs_dir, job_id) {
            Lookup::Found(record) => Lookup::Found(record.into_job()),
            Lookup::Missing => Lookup::Missing,
            Lookup::Corrupt => Lookup::Corrupt,
        }
    }

    pub fn remove(&self, job_id: &str) -> Result<(), EngineError> {
        validate_key(job_id)?;
        remove_if_present(&self.jobs_dir.join(format!("{job_id}.json")))?;
        remove_if_present(&self.jobs_dir.join(format!("{job_id}.lock")))?;
        Ok(())
    }

    pub fn write_batch(&self, definition: &BatchDefinition) -> Result<(), EngineError> {
        validate_key(&definition.id)?;
        self.put(&self.batches_dir, &definition.id, definition)
    }

    pub fn read_batch(&self, batch_id: &str) -> Lookup<BatchDefinition> {
        self.get(&self.batches_dir, batch_id)
    }

    /// Every readable batch definition, oldest first.
    pub fn list_batches(&self) -> Vec<BatchDefinition> {
        let entries = match fs::read_dir(&self.batches_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.batches_dir.display(), error = %e, "cannot list batch definitions");
                return Vec::new();
            }
        };

        let mut batches: Vec<BatchDefinition> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let id = name.strip_suffix(".json")?.to_string();
                self.read_batch(&id).found()
            })
            .collect();
        batches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        batches
    }

    pub fn remove_batch(&self, batch_id: &str) -> Result<(), EngineError> {
        validate_key(batch_id)?;
        remove_if_present(&self.batches_dir.join(format!("{batch_id}.json")))?;
        remove_if_present(&self.batches_dir.join(format!("{batch_id}.lock")))?;
        Ok(())
    }

    /// Delete records whose modification time is older than `max_age`,
    /// together with their lock files and any abandoned temp files.
    pub fn sweep(&self, max_age: Duration) -> SweepReport {
        let now = SystemTime::now();
        let mut report = SweepReport::default();

        for (dir, removed) in [
            (&self.jobs_dir, &mut report.records),
            (&self.batches_dir, &mut report.batches),
        ] {
            let files = stale_files(dir, now, max_age);
            for (name, path) in &files {
                if let Some(id) = name.strip_suffix(".json") {
                    if remove_logged(path) {
                        let _ = remove_if_present(&dir.join(format!("{id}.lock")));
                        removed.push(id.to_string());
                    }
                } else if is_scratch_file(name) && remove_logged(path) {
                    report.scratch_files += 1;
                }
            }
            // Lock files whose record is gone.
            for (name, path) in &files {
                if let Some(id) = name.strip_suffix(".lock")
                    && !dir.join(format!("{id}.json")).exists()
                {
                    remove_logged(path);
                }
            }
        }

        if !report.is_empty() {
            info!(
                records = report.records.len(),
                batches = report.batches.len(),
                scratch = report.scratch_files,
                "swept stale status records"
            );
        }
        report
    }

    fn put<T: Serialize>(&self, dir: &Path, key: &str, value: &T) -> Result<(), EngineError> {
        let body = serde_json::to_vec_pretty(value)?;
        let _guard = self.lock.exclusive(&dir.join(format!("{key}.lock")));
        atomic_write(&dir.join(format!("{key}.json")), &body)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, dir: &Path, key: &str) -> Lookup<T> {
        if validate_key(key).is_err() {
            return Lookup::Missing;
        }
        let path = dir.join(format!("{key}.json"));
        if !path.exists() {
            return Lookup::Missing;
        }

        let contents = {
            let _guard = self.lock.shared(&dir.join(format!("{key}.lock")));
            fs::read(&path)
        };
        let contents = match contents {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Lookup::Missing,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read record");
                return Lookup::Missing;
            }
        };

        match serde_json::from_slice(&contents) {
            Ok(value) => Lookup::Found(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt record treated as absent");
                Lookup::Corrupt
            }
        }
    }
}

/// Keys become file names, so only a conservative alphabet is accepted.
fn validate_key(key: &str) -> Result<(), EngineError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidKey(key.to_string()))
    }
}

fn stale_files(dir: &Path, now: SystemTime, max_age: Duration) -> Vec<(String, PathBuf)> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot scan for stale records");
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_age {
                return None;
            }
            Some((entry.file_name().into_string().ok()?, entry.path()))
        })
        .collect()
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn remove_logged(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove stale file");
            false
        }
    }
}
