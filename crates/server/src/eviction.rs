//! Cache eviction loop.
//!
//! Runs once at startup and then every configured interval (5 minutes by
//! default). For each tenant with a cache budget, the pass walks the cache
//! directory, and when the total size exceeds the budget deletes the oldest
//! files until it fits. Lock files are never touched: they mark in-flight
//! downloads. Eviction failures are logged and skipped, never surfaced to
//! request handling.

use crate::metrics::{CACHE_EVICTED_BYTES, CACHE_EVICTED_FILES, CACHE_SIZE_BYTES};
use crate::state::AppState;
use refract_core::parse_cache_size;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Launch the background eviction task.
pub fn spawn_eviction_loop(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(state.config.eviction.interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            run_eviction(&state).await;
        }
    })
}

/// One eviction pass over every tenant's cache.
pub async fn run_eviction(state: &AppState) {
    // Snapshot under the read lock, then work without it. Multiple origins
    // can share a project; each cache is swept once.
    let tables = state.tables().await;
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for tenant in tables.tenants.values() {
        let t = &tenant.config;
        if t.cache_root.as_os_str().is_empty() || !seen.insert(t.project.clone()) {
            continue;
        }
        let budget = match parse_cache_size(&t.cache_budget) {
            Ok(0) => continue, // unlimited
            Ok(budget) => budget,
            Err(e) => {
                warn!(project = %t.project, error = %e, "unparsable cache budget, skipping");
                continue;
            }
        };
        targets.push((t.project.clone(), t.cache_root.clone(), budget));
    }
    drop(tables);

    for (project, cache_root, budget) in targets {
        let root = cache_root.clone();
        let result = tokio::task::spawn_blocking(move || {
            let before = dir_size(&root);
            let (removed, freed) = evict_cache(&root, budget);
            let after = dir_size(&root);
            (before, removed, freed, after)
        })
        .await;

        match result {
            Ok((before, removed, freed, after)) => {
                CACHE_SIZE_BYTES
                    .with_label_values(&[&project])
                    .set(before.min(i64::MAX as u64) as i64);
                if removed > 0 {
                    info!(
                        project = %project,
                        files_removed = removed,
                        bytes_freed = freed,
                        "cache eviction completed"
                    );
                    CACHE_EVICTED_FILES
                        .with_label_values(&[&project])
                        .inc_by(removed);
                    CACHE_EVICTED_BYTES
                        .with_label_values(&[&project])
                        .inc_by(freed);
                    CACHE_SIZE_BYTES
                        .with_label_values(&[&project])
                        .set(after.min(i64::MAX as u64) as i64);
                }
            }
            Err(e) => {
                warn!(project = %project, error = %e, "cache eviction task failed");
            }
        }
    }
}

/// Regular files under `dir` with size and mtime.
fn collect_files(dir: &Path) -> Vec<(PathBuf, u64, SystemTime)> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                if let Ok(meta) = entry.metadata() {
                    let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    files.push((path, meta.len(), mtime));
                }
            }
        }
    }
    files
}

/// Total size of all regular files under `dir`.
pub fn dir_size(dir: &Path) -> u64 {
    collect_files(dir).iter().map(|(_, size, _)| size).sum()
}

/// Delete the oldest files under `dir` until the total size is at most
/// `max_bytes`. Lock files are exempt. Returns (files removed, bytes freed).
pub fn evict_cache(dir: &Path, max_bytes: u64) -> (u64, u64) {
    if max_bytes == 0 {
        return (0, 0);
    }

    let mut entries: Vec<_> = collect_files(dir)
        .into_iter()
        .filter(|(path, _, _)| path.extension().map(|e| e != "lock").unwrap_or(true))
        .collect();

    let mut total: u64 = entries.iter().map(|(_, size, _)| size).sum();
    if total <= max_bytes {
        return (0, 0);
    }

    entries.sort_by_key(|(_, _, mtime)| *mtime);

    let mut removed = 0u64;
    let mut freed = 0u64;
    for (path, size, _) in entries {
        if total <= max_bytes {
            break;
        }
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "eviction failed to remove file");
            continue;
        }
        total -= size;
        freed += size;
        removed += 1;
    }

    (removed, freed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_files(dir: &Path, count: usize, size: usize) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for i in 0..count {
            let path = dir.join(format!("file_{i:02}.bin"));
            std::fs::write(&path, vec![0u8; size]).unwrap();
            // Stagger mtimes so the eviction order is deterministic.
            std::thread::sleep(Duration::from_millis(5));
            paths.push(path);
        }
        paths
    }

    #[test]
    fn under_budget_deletes_nothing() {
        let dir = tempdir().unwrap();
        write_files(dir.path(), 3, 100);
        let (removed, freed) = evict_cache(dir.path(), 1000);
        assert_eq!((removed, freed), (0, 0));
        assert_eq!(dir_size(dir.path()), 300);
    }

    #[test]
    fn evicts_oldest_first_until_within_budget() {
        let dir = tempdir().unwrap();
        let paths = write_files(dir.path(), 15, 1000);

        let (removed, freed) = evict_cache(dir.path(), 10_000);
        assert_eq!(removed, 5);
        assert_eq!(freed, 5000);
        assert!(dir_size(dir.path()) <= 10_000);

        // The deleted files are a prefix of the mtime-sorted list.
        for path in &paths[..5] {
            assert!(!path.exists(), "{} should be evicted", path.display());
        }
        for path in &paths[5..] {
            assert!(path.exists(), "{} should survive", path.display());
        }
    }

    #[test]
    fn lock_files_are_never_evicted() {
        let dir = tempdir().unwrap();
        let lock = dir.path().join("hero.png.lock");
        std::fs::write(&lock, vec![0u8; 50]).unwrap();
        write_files(dir.path(), 4, 1000);

        let (removed, _) = evict_cache(dir.path(), 1000);
        assert!(lock.exists());
        assert!(removed >= 3);
    }

    #[test]
    fn zero_budget_means_unlimited() {
        let dir = tempdir().unwrap();
        write_files(dir.path(), 2, 100);
        assert_eq!(evict_cache(dir.path(), 0), (0, 0));
    }

    #[test]
    fn walks_nested_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/deep.bin"), vec![0u8; 500]).unwrap();
        assert_eq!(dir_size(dir.path()), 500);
    }
}
