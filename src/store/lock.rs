//! Advisory locking for status records.
//!
//! Locking only narrows the window for torn reads on platforms where the
//! rename in [`atomic_write`](super::atomic) is not enough on its own. It is
//! never required for correctness, so every failure path here degrades to
//! "no lock" instead of an error.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fs2::FileExt;
use tracing::{debug, info, warn};

/// Held for the duration of one read or write. Unlocks on drop.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Locking strategy selected once at startup.
pub trait RecordLock: Send + Sync + fmt::Debug {
    /// Lock for reading. `None` means "proceed unlocked".
    fn shared(&self, path: &Path) -> Option<LockGuard>;

    /// Lock for writing. `None` means "proceed unlocked".
    fn exclusive(&self, path: &Path) -> Option<LockGuard>;

    fn name(&self) -> &'static str;
}

/// Used when locks are disabled or the filesystem rejects them.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLock;

impl RecordLock for NoLock {
    fn shared(&self, _path: &Path) -> Option<LockGuard> {
        None
    }

    fn exclusive(&self, _path: &Path) -> Option<LockGuard> {
        None
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// `flock`/`LockFileEx` based locking via `fs2`, with bounded backoff.
#[derive(Debug, Clone)]
pub struct AdvisoryLock {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for AdvisoryLock {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(50),
        }
    }
}

impl AdvisoryLock {
    fn acquire(&self, path: &Path, exclusive: bool) -> Option<LockGuard> {
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
        {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot open lock file, continuing unlocked");
                return None;
            }
        };

        let contended = fs2::lock_contended_error().raw_os_error();
        let mut backoff = self.initial_backoff;
        for _ in 0..self.max_attempts.max(1) {
            let attempt = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match attempt {
                Ok(()) => return Some(LockGuard { file }),
                Err(e) if e.raw_os_error() == contended => {
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(self.max_backoff);
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "advisory lock rejected, continuing unlocked");
                    return None;
                }
            }
        }

        warn!(path = %path.display(), "lock still contended after retries, continuing unlocked");
        None
    }
}

impl RecordLock for AdvisoryLock {
    fn shared(&self, path: &Path) -> Option<LockGuard> {
        self.acquire(path, false)
    }

    fn exclusive(&self, path: &Path) -> Option<LockGuard> {
        self.acquire(path, true)
    }

    fn name(&self) -> &'static str {
        "advisory"
    }
}

/// Pick a locking strategy for records stored under `dir`.
///
/// Probes the filesystem once; if it refuses advisory locks the store runs
/// with [`NoLock`].
pub fn select_lock(enabled: bool, dir: &Path) -> Arc<dyn RecordLock> {
    if !enabled {
        info!("file locks disabled by configuration");
        return Arc::new(NoLock);
    }

    let probe = dir.join(".lock-probe");
    let outcome = std::fs::create_dir_all(dir)
        .and_then(|()| {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&probe)
        })
        .and_then(|file| {
            FileExt::try_lock_exclusive(&file)?;
            FileExt::unlock(&file)
        });
    let _ = std::fs::remove_file(&probe);

    match outcome {
        Ok(()) => Arc::new(AdvisoryLock::default()),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "advisory locks unavailable, continuing without them");
            Arc::new(NoLock)
        }
    }
}
