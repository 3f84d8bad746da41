// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Mutual exclusion for knowledge-base working trees.
//!
//! Every write-side KB operation runs under a [`KbLockHandle`], which holds
//! two exclusions acquired in fixed order:
//!
//! 1. an in-process async mutex keyed by the canonical KB root path, and
//! 2. an advisory file lock on `<kb_root>/.sync.lock` for cross-process
//!    exclusion between bot instances sharing a filesystem.
//!
//! Acquiring in this fixed order (async first, file second) means two
//! processes can never hold the layers in opposite orders, so the pair
//! cannot deadlock.  Release happens in reverse order via `Drop`, so every
//! successful acquisition is paired with exactly one release on success,
//! error, and cancellation paths alike.
//!
//! The file lock is advisory and kernel-owned: if the holding process dies,
//! the OS releases it.  A leftover `.sync.lock` *file* is therefore
//! harmless; the pid written inside is diagnostic only.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs4::fs_std::FileExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const LOCK_FILE_NAME: &str = ".sync.lock";

/// Poll interval while waiting on the cross-process file lock.
const FILE_LOCK_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("knowledge base at {path} is busy (waited {waited_secs}s)")]
    Busy { path: String, waited_secs: u64 },
    #[error("lock i/o error at {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Scoped KB lock.  Dropping the handle releases the file lock first, then
/// the in-process token.
pub struct KbLockHandle {
    file: Option<std::fs::File>,
    _token: tokio::sync::OwnedMutexGuard<()>,
    path: PathBuf,
}

impl KbLockHandle {
    pub fn kb_root(&self) -> &Path {
        &self.path
    }
}

impl Drop for KbLockHandle {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!(path = %self.path.display(), "failed to unlock sync file: {e}");
            }
        }
        debug!(path = %self.path.display(), "released KB lock");
    }
}

impl std::fmt::Debug for KbLockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KbLockHandle")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Coordinates exclusive access to every KB this process touches.
#[derive(Default)]
pub struct KbSyncManager {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl KbSyncManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire both exclusion layers for `kb_root`, waiting at most
    /// `timeout`.  Waiters on the in-process layer are served in FIFO
    /// order (tokio mutex fairness).
    pub async fn with_lock(
        &self,
        kb_root: &Path,
        timeout: Duration,
    ) -> Result<KbLockHandle, SyncError> {
        let started = Instant::now();
        let key = canonical_key(kb_root);

        let mutex = {
            let mut map = self.locks.lock().await;
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let token = tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| SyncError::Busy {
                path: key.display().to_string(),
                waited_secs: started.elapsed().as_secs(),
            })?;

        // Layer two: the on-disk advisory lock.  Polled rather than blocked
        // so the deadline keeps applying; the token above already serialises
        // in-process waiters, so polling here only contends with *other*
        // processes.
        let file = self.acquire_file_lock(kb_root, started, timeout).await?;

        debug!(path = %kb_root.display(), waited_ms = started.elapsed().as_millis() as u64, "acquired KB lock");
        Ok(KbLockHandle {
            file: Some(file),
            _token: token,
            path: kb_root.to_path_buf(),
        })
    }

    async fn acquire_file_lock(
        &self,
        kb_root: &Path,
        started: Instant,
        timeout: Duration,
    ) -> Result<std::fs::File, SyncError> {
        let io_err = |reason: String| SyncError::Io {
            path: kb_root.display().to_string(),
            reason,
        };
        std::fs::create_dir_all(kb_root).map_err(|e| io_err(e.to_string()))?;
        let lock_path = kb_root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| io_err(e.to_string()))?;

        loop {
            match file.try_lock_exclusive() {
                Ok(true) => break,
                Ok(false) => {
                    if started.elapsed() >= timeout {
                        return Err(SyncError::Busy {
                            path: kb_root.display().to_string(),
                            waited_secs: started.elapsed().as_secs(),
                        });
                    }
                    tokio::time::sleep(FILE_LOCK_POLL).await;
                }
                Err(e) => return Err(io_err(format!("file lock: {e}"))),
            }
        }

        // Holder pid, for hand diagnostics on a wedged deployment.
        let _ = file.set_len(0);
        let mut f = &file;
        let _ = writeln!(f, "{}", std::process::id());
        let _ = f.flush();
        Ok(file)
    }
}

/// Stable lock key for a KB root.  Canonicalize when the path exists;
/// otherwise fall back to a lexical clean so `kb` and `./kb` still map to
/// the same key.
fn canonical_key(path: &Path) -> PathBuf {
    match std::fs::canonicalize(path) {
        Ok(p) => p,
        Err(_) => {
            let abs = if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            };
            quill_config::paths::lexical_clean(&abs)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn acquire_and_reacquire_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = KbSyncManager::new();
        let h1 = mgr
            .with_lock(dir.path(), Duration::from_secs(1))
            .await
            .unwrap();
        drop(h1);
        let h2 = mgr
            .with_lock(dir.path(), Duration::from_secs(1))
            .await
            .unwrap();
        drop(h2);
    }

    #[tokio::test]
    async fn contended_lock_times_out_with_busy() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = KbSyncManager::new();
        let _held = mgr
            .with_lock(dir.path(), Duration::from_secs(1))
            .await
            .unwrap();
        let err = mgr
            .with_lock(dir.path(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Busy { .. }));
    }

    #[tokio::test]
    async fn lock_is_mutually_exclusive_within_process() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = Arc::new(KbSyncManager::new());
        let in_section = Arc::new(AtomicBool::new(false));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let mgr = mgr.clone();
            let flag = in_section.clone();
            let path = dir.path().to_path_buf();
            tasks.push(tokio::spawn(async move {
                let _h = mgr.with_lock(&path, Duration::from_secs(5)).await.unwrap();
                assert!(
                    !flag.swap(true, Ordering::SeqCst),
                    "two holders inside the critical section"
                );
                tokio::time::sleep(Duration::from_millis(10)).await;
                flag.store(false, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
    }

    #[tokio::test]
    async fn different_kbs_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = KbSyncManager::new();
        let a = mgr
            .with_lock(&dir.path().join("kb_a"), Duration::from_secs(1))
            .await
            .unwrap();
        // Holding kb_a must not block kb_b.
        let b = mgr
            .with_lock(&dir.path().join("kb_b"), Duration::from_millis(200))
            .await
            .unwrap();
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn relative_and_dotted_paths_share_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let kb = dir.path().join("kb");
        std::fs::create_dir_all(&kb).unwrap();
        let dotted = dir.path().join(".").join("kb");

        let mgr = KbSyncManager::new();
        let _h = mgr.with_lock(&kb, Duration::from_secs(1)).await.unwrap();
        let err = mgr
            .with_lock(&dotted, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Busy { .. }));
    }

    #[tokio::test]
    async fn lock_file_is_created_with_pid() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = KbSyncManager::new();
        let h = mgr
            .with_lock(dir.path(), Duration::from_secs(1))
            .await
            .unwrap();
        let content = std::fs::read_to_string(dir.path().join(LOCK_FILE_NAME)).unwrap();
        assert_eq!(
            content.trim(),
            std::process::id().to_string(),
            "lock file should carry the holder pid"
        );
        drop(h);
    }

    #[tokio::test]
    async fn foreign_file_lock_yields_busy() {
        // Simulate another process holding the on-disk lock by taking it
        // directly, bypassing the in-process layer.
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(LOCK_FILE_NAME);
        let foreign = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .unwrap();
        assert!(foreign.try_lock_exclusive().unwrap());

        let mgr = KbSyncManager::new();
        let err = mgr
            .with_lock(dir.path(), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Busy { .. }));

        FileExt::unlock(&foreign).unwrap();
        // And once released, acquisition succeeds.
        let _h = mgr
            .with_lock(dir.path(), Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stale_lock_file_without_holder_is_reacquired() {
        let dir = tempfile::tempdir().unwrap();
        // A leftover lock file from a dead process: present but unlocked.
        std::fs::write(dir.path().join(LOCK_FILE_NAME), "99999\n").unwrap();
        let mgr = KbSyncManager::new();
        let h = mgr
            .with_lock(dir.path(), Duration::from_millis(500))
            .await
            .unwrap();
        drop(h);
    }
}
