// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-user settings overlay, persisted as a single JSON document keyed by
//! user id:
//!
//! ```json
//! { "1042": { "KB_TOPICS_ONLY": false, "AGENT_MAX_ITERATIONS": 20 } }
//! ```
//!
//! Every read-modify-write runs under an exclusive advisory lock on a
//! sibling `.lock` file, so concurrent bot processes sharing the data
//! directory cannot lose updates.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tracing::debug;

use crate::store::SettingsError;

type OverlayMap = HashMap<String, HashMap<String, serde_json::Value>>;

/// File-backed store of per-user setting overrides.
#[derive(Debug, Clone)]
pub struct OverlayStore {
    path: PathBuf,
}

impl OverlayStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current override for one user/setting, if any.
    pub fn get(&self, user_id: i64, name: &str) -> Result<Option<serde_json::Value>, SettingsError> {
        let _guard = self.lock()?;
        let map = self.read_map()?;
        Ok(map
            .get(&user_id.to_string())
            .and_then(|m| m.get(name))
            .cloned())
    }

    /// All overrides for one user.
    pub fn all_for(&self, user_id: i64) -> Result<HashMap<String, serde_json::Value>, SettingsError> {
        let _guard = self.lock()?;
        let map = self.read_map()?;
        Ok(map.get(&user_id.to_string()).cloned().unwrap_or_default())
    }

    /// Insert or replace an override.
    pub fn set(
        &self,
        user_id: i64,
        name: &str,
        value: serde_json::Value,
    ) -> Result<(), SettingsError> {
        let _guard = self.lock()?;
        let mut map = self.read_map()?;
        map.entry(user_id.to_string())
            .or_default()
            .insert(name.to_string(), value);
        self.write_map(&map)
    }

    /// Remove an override.  Returns whether anything was removed.
    pub fn reset(&self, user_id: i64, name: &str) -> Result<bool, SettingsError> {
        let _guard = self.lock()?;
        let mut map = self.read_map()?;
        let removed = match map.get_mut(&user_id.to_string()) {
            Some(user) => {
                let removed = user.remove(name).is_some();
                if user.is_empty() {
                    map.remove(&user_id.to_string());
                }
                removed
            }
            None => false,
        };
        if removed {
            self.write_map(&map)?;
        }
        Ok(removed)
    }

    fn read_map(&self) -> Result<OverlayMap, SettingsError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(OverlayMap::new()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| SettingsError::Store {
                path: self.path.display().to_string(),
                reason: format!("parse: {e}"),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(OverlayMap::new()),
            Err(e) => Err(SettingsError::Store {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn write_map(&self, map: &OverlayMap) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SettingsError::Store {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                })?;
            }
        }
        let json = serde_json::to_string_pretty(map).map_err(|e| SettingsError::Store {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(path = %self.path.display(), users = map.len(), "writing overlay");
        std::fs::write(&self.path, json).map_err(|e| SettingsError::Store {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn lock(&self) -> Result<OverlayLock, SettingsError> {
        let lock_path = lock_path_for(&self.path);
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SettingsError::Store {
                    path: lock_path.display().to_string(),
                    reason: e.to_string(),
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| SettingsError::Store {
                path: lock_path.display().to_string(),
                reason: e.to_string(),
            })?;
        file.lock_exclusive().map_err(|e| SettingsError::Store {
            path: lock_path.display().to_string(),
            reason: format!("lock: {e}"),
        })?;
        Ok(OverlayLock { file })
    }
}

/// `<file>.lock` sibling used for advisory locking.
fn lock_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".lock");
    PathBuf::from(os)
}

struct OverlayLock {
    file: File,
}

impl Drop for OverlayLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, OverlayStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = OverlayStore::new(dir.path().join("user_settings_overrides.json"));
        (dir, store)
    }

    #[test]
    fn get_on_missing_file_is_none() {
        let (_d, s) = store();
        assert!(s.get(1, "KB_TOPICS_ONLY").unwrap().is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let (_d, s) = store();
        s.set(1, "KB_TOPICS_ONLY", serde_json::json!(false)).unwrap();
        assert_eq!(
            s.get(1, "KB_TOPICS_ONLY").unwrap(),
            Some(serde_json::json!(false))
        );
    }

    #[test]
    fn overlays_are_per_user() {
        let (_d, s) = store();
        s.set(1, "AGENT_MAX_ITERATIONS", serde_json::json!(20)).unwrap();
        assert!(s.get(2, "AGENT_MAX_ITERATIONS").unwrap().is_none());
    }

    #[test]
    fn reset_removes_and_reports() {
        let (_d, s) = store();
        s.set(1, "AGENT_MAX_ITERATIONS", serde_json::json!(20)).unwrap();
        assert!(s.reset(1, "AGENT_MAX_ITERATIONS").unwrap());
        assert!(!s.reset(1, "AGENT_MAX_ITERATIONS").unwrap());
        assert!(s.get(1, "AGENT_MAX_ITERATIONS").unwrap().is_none());
    }

    #[test]
    fn empty_user_entry_is_dropped_from_file() {
        let (_d, s) = store();
        s.set(7, "KB_TOPICS_ONLY", serde_json::json!(true)).unwrap();
        s.reset(7, "KB_TOPICS_ONLY").unwrap();
        let text = std::fs::read_to_string(s.path()).unwrap();
        assert!(!text.contains("\"7\""), "stale user key left behind: {text}");
    }

    #[test]
    fn all_for_returns_full_map() {
        let (_d, s) = store();
        s.set(3, "KB_TOPICS_ONLY", serde_json::json!(false)).unwrap();
        s.set(3, "AGENT_MAX_ITERATIONS", serde_json::json!(5)).unwrap();
        let all = s.all_for(3).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn corrupt_file_surfaces_store_error() {
        let (_d, s) = store();
        std::fs::write(s.path(), "{ not json").unwrap();
        assert!(s.get(1, "X").is_err());
    }
}
