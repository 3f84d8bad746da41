// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The processed-event log: an idempotent record of group fingerprints.
//!
//! A fingerprint, once recorded, is never un-recorded (the log only grows,
//! modulo pruning of the oldest entries).  `record` is atomic across
//! processes: concurrent writers serialize on the advisory file lock and
//! only the first one inserts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::jsonfile::LockedJsonFile;
use crate::StoreError;

/// Bound on the number of retained records; the oldest beyond this are
/// pruned at write time.  Far larger than any realistic retry horizon.
const MAX_RECORDS: usize = 10_000;

/// Truncated to keep the log readable when inspected by hand.
const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: i64,
    pub preview: String,
}

type LogDoc = HashMap<String, ProcessedEntry>;

/// Cross-process-safe dedup log keyed by group fingerprint.
#[derive(Debug, Clone)]
pub struct ProcessedLog {
    file: LockedJsonFile,
}

impl ProcessedLog {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            file: LockedJsonFile::new(path),
        }
    }

    /// Whether this fingerprint has already completed processing.
    pub fn is_processed(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let doc: LogDoc = self.file.read()?;
        Ok(doc.contains_key(fingerprint))
    }

    /// Record a fingerprint.  Returns `true` if this call inserted it,
    /// `false` if it was already present (the entry is left untouched).
    pub fn record(
        &self,
        fingerprint: &str,
        user_id: i64,
        preview: &str,
    ) -> Result<bool, StoreError> {
        let fingerprint = fingerprint.to_string();
        let preview: String = preview.chars().take(PREVIEW_CHARS).collect();
        self.file.update(move |doc: &mut LogDoc| {
            if doc.contains_key(&fingerprint) {
                return false;
            }
            doc.insert(
                fingerprint.clone(),
                ProcessedEntry {
                    timestamp: Utc::now(),
                    user_id,
                    preview,
                },
            );
            if doc.len() > MAX_RECORDS {
                prune(doc);
            }
            debug!(fingerprint = %fingerprint, user_id, "recorded processed group");
            true
        })
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let doc: LogDoc = self.file.read()?;
        Ok(doc.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// Drop the oldest entries until the log fits the bound again.
fn prune(doc: &mut LogDoc) {
    let excess = doc.len().saturating_sub(MAX_RECORDS);
    if excess == 0 {
        return;
    }
    let mut by_age: Vec<(String, DateTime<Utc>)> = doc
        .iter()
        .map(|(k, v)| (k.clone(), v.timestamp))
        .collect();
    by_age.sort_by_key(|(_, ts)| *ts);
    for (key, _) in by_age.into_iter().take(excess) {
        doc.remove(&key);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
