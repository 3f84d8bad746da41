// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Per-user persistent memory.
//!
//! Each user owns a JSON document under `data/memory/user_{id}/memory.json`.
//! `user_id` is a required argument on every operation — there is no
//! cross-user surface at all, which is what makes the isolation property
//! trivial to audit.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::HubError;

pub const DEFAULT_CATEGORY: &str = "general";

/// How many entries `retrieve` returns at most.
const RETRIEVE_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MemoryDoc {
    entries: Vec<MemoryEntry>,
}

/// File-backed memory store rooted at the hub's memory directory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    root: PathBuf,
}

impl MemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn user_file(&self, user_id: i64) -> PathBuf {
        self.root.join(format!("user_{user_id}")).join("memory.json")
    }

    fn load(&self, user_id: i64) -> Result<MemoryDoc, HubError> {
        let path = self.user_file(user_id);
        match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Ok(MemoryDoc::default()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| HubError::Io {
                path: path.display().to_string(),
                reason: format!("parse: {e}"),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MemoryDoc::default()),
            Err(e) => Err(HubError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn save(&self, user_id: i64, doc: &MemoryDoc) -> Result<(), HubError> {
        let path = self.user_file(user_id);
        let io_err = |reason: String| HubError::Io {
            path: path.display().to_string(),
            reason,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(doc).map_err(|e| io_err(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| io_err(e.to_string()))
    }

    /// Store a memory; returns its id.
    pub fn store(
        &self,
        user_id: i64,
        content: &str,
        category: Option<&str>,
    ) -> Result<String, HubError> {
        let mut doc = self.load(user_id)?;
        let entry = MemoryEntry {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            category: category
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(DEFAULT_CATEGORY)
                .to_string(),
            created_at: Utc::now(),
        };
        let id = entry.id.clone();
        doc.entries.push(entry);
        self.save(user_id, &doc)?;
        debug!(user_id, id = %id, "memory stored");
        Ok(id)
    }

    /// Retrieve memories matching `query` by token overlap, best first.
    pub fn retrieve(
        &self,
        user_id: i64,
        query: &str,
        category: Option<&str>,
    ) -> Result<Vec<MemoryEntry>, HubError> {
        let doc = self.load(user_id)?;
        let query_tokens = tokenize(query);
        let mut scored: Vec<(usize, MemoryEntry)> = doc
            .entries
            .into_iter()
            .filter(|e| category.map_or(true, |c| e.category.eq_ignore_ascii_case(c)))
            .filter_map(|e| {
                let score = overlap(&query_tokens, &tokenize(&e.content));
                (score > 0).then_some((score, e))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.created_at.cmp(&a.1.created_at)));
        Ok(scored
            .into_iter()
            .take(RETRIEVE_LIMIT)
            .map(|(_, e)| e)
            .collect())
    }

    /// Distinct categories this user has stored, sorted.
    pub fn list_categories(&self, user_id: i64) -> Result<Vec<String>, HubError> {
        let doc = self.load(user_id)?;
        let mut cats: Vec<String> = doc.entries.into_iter().map(|e| e.category).collect();
        cats.sort();
        cats.dedup();
        Ok(cats)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_string)
        .collect()
}

fn overlap(a: &[String], b: &[String]) -> usize {
    a.iter().filter(|t| b.contains(t)).count()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
