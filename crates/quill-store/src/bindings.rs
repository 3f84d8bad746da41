// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::jsonfile::LockedJsonFile;
use crate::StoreError;

/// Whether a KB was created locally or cloned from a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KbKind {
    Local,
    Remote,
}

/// One user's knowledge-base binding.  Exactly one binding exists per user;
/// rebinding atomically replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbBinding {
    pub kb_name: String,
    pub kb_root_path: PathBuf,
    pub kind: KbKind,
    pub remote_url: Option<String>,
}

type BindingDoc = HashMap<String, KbBinding>;

/// File-backed user→KB binding store.
#[derive(Debug, Clone)]
pub struct BindingStore {
    file: LockedJsonFile,
}

impl BindingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: LockedJsonFile::new(path),
        }
    }

    pub fn get(&self, user_id: i64) -> Result<Option<KbBinding>, StoreError> {
        let doc: BindingDoc = self.file.read()?;
        Ok(doc.get(&user_id.to_string()).cloned())
    }

    /// Create or replace the user's binding.  Returns the previous binding
    /// if one existed.
    pub fn bind(&self, user_id: i64, binding: KbBinding) -> Result<Option<KbBinding>, StoreError> {
        info!(user_id, kb = %binding.kb_name, "binding KB");
        self.file
            .update(move |doc: &mut BindingDoc| doc.insert(user_id.to_string(), binding))
    }

    /// Remove the user's binding.  Returns it if one existed.
    pub fn unbind(&self, user_id: i64) -> Result<Option<KbBinding>, StoreError> {
        self.file
            .update(move |doc: &mut BindingDoc| doc.remove(&user_id.to_string()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
