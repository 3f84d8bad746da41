// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use quill_config::ServiceMode;

use crate::jsonfile::LockedJsonFile;
use crate::StoreError;

type ModeDoc = HashMap<String, ServiceMode>;

/// Persistent per-user service mode (`/note`, `/ask`, `/agent`).
#[derive(Debug, Clone)]
pub struct ModeStore {
    file: LockedJsonFile,
}

impl ModeStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            file: LockedJsonFile::new(path),
        }
    }

    /// Current mode for a user; defaults to [`ServiceMode::Note`] when the
    /// user has never switched.
    pub fn get(&self, user_id: i64) -> Result<ServiceMode, StoreError> {
        let doc: ModeDoc = self.file.read()?;
        Ok(doc
            .get(&user_id.to_string())
            .copied()
            .unwrap_or_default())
    }

    pub fn set(&self, user_id: i64, mode: ServiceMode) -> Result<(), StoreError> {
        self.file.update(move |doc: &mut ModeDoc| {
            doc.insert(user_id.to_string(), mode);
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ModeStore) {
        let dir = tempfile::tempdir().unwrap();
        let s = ModeStore::new(dir.path().join("user_modes.json"));
        (dir, s)
    }

    #[test]
    fn default_mode_is_note() {
        let (_d, s) = store();
        assert_eq!(s.get(1).unwrap(), ServiceMode::Note);
    }

    #[test]
    fn set_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_modes.json");
        ModeStore::new(&path).set(1, ServiceMode::Ask).unwrap();
        assert_eq!(ModeStore::new(&path).get(1).unwrap(), ServiceMode::Ask);
    }

    #[test]
    fn modes_are_per_user() {
        let (_d, s) = store();
        s.set(1, ServiceMode::Task).unwrap();
        assert_eq!(s.get(1).unwrap(), ServiceMode::Task);
        assert_eq!(s.get(2).unwrap(), ServiceMode::Note);
    }
}
