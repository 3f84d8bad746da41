// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::StoreError;

/// A JSON document on disk with advisory-locked access.
///
/// Reads take a shared lock; read-modify-write cycles take an exclusive
/// lock for their whole duration.  The lock lives on a sibling `.lock`
/// file so rewriting the document never races the lock itself.
#[derive(Debug, Clone)]
pub(crate) struct LockedJsonFile {
    path: PathBuf,
}

impl LockedJsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document under a shared lock.  A missing or empty file
    /// yields `T::default()`.
    pub fn read<T>(&self) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Default,
    {
        let _guard = self.lock(false)?;
        self.read_unlocked()
    }

    /// Run `f` over the document under an exclusive lock and persist the
    /// result.  Returns whatever `f` returns.
    pub fn update<T, R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StoreError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let _guard = self.lock(true)?;
        let mut doc: T = self.read_unlocked()?;
        let out = f(&mut doc);
        self.write_unlocked(&doc)?;
        Ok(out)
    }

    fn read_unlocked<T>(&self) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Default,
    {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(T::default()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| StoreError::Corrupt {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn write_unlocked<T: Serialize>(&self, doc: &T) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }
        let json = serde_json::to_string_pretty(doc).map_err(|e| StoreError::Corrupt {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(&self.path, json).map_err(|e| self.io_err(e))
    }

    fn lock(&self, exclusive: bool) -> Result<LockGuard, StoreError> {
        let lock_path = {
            let mut os = self.path.as_os_str().to_owned();
            os.push(".lock");
            PathBuf::from(os)
        };
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| self.io_err(e))?;
        let locked = if exclusive {
            file.lock_exclusive()
        } else {
            file.lock_shared()
        };
        locked.map_err(|e| StoreError::Io {
            path: lock_path.display().to_string(),
            reason: format!("lock: {e}"),
        })?;
        Ok(LockGuard { file })
    }

    fn io_err(&self, e: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
