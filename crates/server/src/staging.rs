//! Staging cache with single-flight fetch.
//!
//! Maps a tenant-relative source path to a local file under the tenant's
//! cache root, fetching from the storage fallback chain on miss. At most one
//! fetcher runs per staging path across all tasks and processes sharing the
//! cache directory, enforced with an exclusive-create lock file. A crashed
//! fetcher's lock goes stale after [`STALE_LOCK_TIMEOUT`] and is reclaimed;
//! waiters that exhaust the poll budget get [`StagingError::InProgress`],
//! which the pipeline turns into a self-redirect.

use crate::state::RuntimeTenant;
use refract_core::pathsafe::join_under;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// A lock older than this belongs to a presumed-crashed fetcher.
pub const STALE_LOCK_TIMEOUT: Duration = Duration::from_secs(300);
/// Delay between lock polls.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Poll budget before giving up with `InProgress`.
pub const MAX_POLL_CYCLES: u32 = 10;

/// Staging failures, ordered by how the pipeline reacts to them.
#[derive(Debug, Error)]
pub enum StagingError {
    /// Another fetcher holds the lock beyond our poll budget.
    #[error("staging in progress")]
    InProgress,

    /// Every storage in the chain failed; carries the last error.
    #[error("all storages failed: {0}")]
    AllStoragesFailed(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One storage attempt, recorded for debug headers.
#[derive(Clone, Debug)]
pub struct StorageAttempt {
    pub index: usize,
    pub kind: &'static str,
    pub base_path: String,
    /// `None` on success.
    pub error: Option<String>,
}

/// A successful staging result.
#[derive(Debug)]
pub struct StagingOutcome {
    pub staged_path: PathBuf,
    /// True when the file was already on disk.
    pub cache_hit: bool,
    pub attempts: Vec<StorageAttempt>,
    /// Index of the storage that produced the file, when fetched.
    pub success_index: Option<usize>,
}

/// Deletes the lock file on every exit path.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(lock = %self.path.display(), error = %e, "failed to remove staging lock");
            }
        }
    }
}

/// Whether a lock file's mtime marks it as abandoned.
pub(crate) fn is_stale(modified: SystemTime, now: SystemTime) -> bool {
    now.duration_since(modified)
        .map(|age| age > STALE_LOCK_TIMEOUT)
        .unwrap_or(false)
}

/// Acquire the staging lock with exclusive-create semantics.
///
/// The create-new open is the single-flight primitive: it is atomic across
/// processes on a shared filesystem, unlike any check-then-write sequence.
async fn acquire_lock(lock_path: &Path) -> Result<LockGuard, StagingError> {
    let mut polls = 0u32;
    loop {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
            .await
        {
            Ok(_) => {
                return Ok(LockGuard {
                    path: lock_path.to_path_buf(),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match fs::metadata(lock_path).await {
                    Ok(meta) => {
                        if let Ok(modified) = meta.modified() {
                            if is_stale(modified, SystemTime::now()) {
                                debug!(lock = %lock_path.display(), "reclaiming stale staging lock");
                                let _ = fs::remove_file(lock_path).await;
                                continue;
                            }
                        }
                    }
                    // Holder finished between our open and stat; retry.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(StagingError::Io(e)),
                }

                polls += 1;
                if polls > MAX_POLL_CYCLES {
                    return Err(StagingError::InProgress);
                }
                tokio::time::sleep(LOCK_POLL_INTERVAL).await;
            }
            Err(e) => return Err(StagingError::Io(e)),
        }
    }
}

/// Stage `original_path` for `tenant`, returning the local path.
pub async fn stage(
    tenant: &RuntimeTenant,
    original_path: &str,
) -> Result<StagingOutcome, StagingError> {
    let staged = join_under(&tenant.config.cache_root, original_path)
        .map_err(|e| StagingError::InvalidPath(e.to_string()))?;

    if fs::try_exists(&staged).await? {
        return Ok(StagingOutcome {
            staged_path: staged,
            cache_hit: true,
            attempts: Vec::new(),
            success_index: None,
        });
    }

    if let Some(parent) = staged.parent() {
        fs::create_dir_all(parent).await?;
    }

    let lock_path = PathBuf::from(format!("{}.lock", staged.display()));
    let _lock = acquire_lock(&lock_path).await?;

    // A waiter that acquired the lock after the original fetcher finished
    // finds the file already staged.
    if fs::try_exists(&staged).await? {
        return Ok(StagingOutcome {
            staged_path: staged,
            cache_hit: true,
            attempts: Vec::new(),
            success_index: None,
        });
    }

    let mut attempts = Vec::new();
    let mut last_error = String::new();

    for (index, (binding, driver)) in tenant
        .config
        .storages
        .iter()
        .zip(tenant.drivers.iter())
        .enumerate()
    {
        let remote_key = if binding.base_path.is_empty() {
            original_path.to_string()
        } else {
            format!("{}/{}", binding.base_path, original_path)
        };

        match driver.fetch_to_disk(&remote_key, &staged).await {
            Ok(()) => {
                attempts.push(StorageAttempt {
                    index,
                    kind: driver.driver_name(),
                    base_path: binding.base_path.clone(),
                    error: None,
                });
                return Ok(StagingOutcome {
                    staged_path: staged,
                    cache_hit: false,
                    attempts,
                    success_index: Some(index),
                });
            }
            Err(e) => {
                // A failed fetch may leave a partial file; the next attempt
                // (or the next request) must not mistake it for a hit.
                let _ = fs::remove_file(&staged).await;
                debug!(index, storage = driver.driver_name(), error = %e, "storage attempt failed");
                last_error = e.to_string();
                attempts.push(StorageAttempt {
                    index,
                    kind: driver.driver_name(),
                    base_path: binding.base_path.clone(),
                    error: Some(last_error.clone()),
                });
            }
        }
    }

    Err(StagingError::AllStoragesFailed(last_error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lock_is_not_stale() {
        let now = SystemTime::now();
        assert!(!is_stale(now, now));
        assert!(!is_stale(now - Duration::from_secs(299), now));
    }

    #[test]
    fn old_lock_is_stale() {
        let now = SystemTime::now();
        assert!(is_stale(now - Duration::from_secs(301), now));
    }

    #[test]
    fn future_mtime_is_not_stale() {
        let now = SystemTime::now();
        assert!(!is_stale(now + Duration::from_secs(60), now));
    }
}
