// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Per-KB document index backing `kb_vector_search`.
//!
//! Embedding-model selection is out of scope here; ranking is a plain
//! term-frequency score over tokenized document text, which is
//! deterministic, dependency-free, and good enough for note-sized corpora.
//! The index schema (`{id, path, text}` documents) is what the bot's
//! vector-search coordinator feeds through `add/update/delete/reindex`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::HubError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorDoc {
    pub id: String,
    /// Path relative to the KB root.
    pub path: String,
    pub text: String,
}

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub path: String,
    pub score: f64,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexDoc {
    documents: Vec<VectorDoc>,
}

/// File-backed per-KB index, one JSON file per `kb_id`.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    root: PathBuf,
}

const SNIPPET_CHARS: usize = 200;

impl VectorIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn index_file(&self, kb_id: &str) -> PathBuf {
        // kb_id is a name, not a path; flatten anything suspicious.
        let safe: String = kb_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("kb_{safe}.index.json"))
    }

    fn load(&self, kb_id: &str) -> Result<IndexDoc, HubError> {
        let path = self.index_file(kb_id);
        match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Ok(IndexDoc::default()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| HubError::Io {
                path: path.display().to_string(),
                reason: format!("parse: {e}"),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IndexDoc::default()),
            Err(e) => Err(HubError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn save(&self, kb_id: &str, doc: &IndexDoc) -> Result<(), HubError> {
        let path = self.index_file(kb_id);
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

    /// Add documents; existing ids are left untouched.  Returns how many
    /// were added.
    pub fn add_documents(&self, kb_id: &str, docs: Vec<VectorDoc>) -> Result<usize, HubError> {
        let mut index = self.load(kb_id)?;
        let mut added = 0;
        for doc in docs {
            if !index.documents.iter().any(|d| d.id == doc.id) {
                index.documents.push(doc);
                added += 1;
            }
        }
        self.save(kb_id, &index)?;
        Ok(added)
    }

    /// Replace documents by id.  Returns how many were updated.
    pub fn update_documents(&self, kb_id: &str, docs: Vec<VectorDoc>) -> Result<usize, HubError> {
        let mut index = self.load(kb_id)?;
        let mut updated = 0;
        for doc in docs {
            if let Some(existing) = index.documents.iter_mut().find(|d| d.id == doc.id) {
                *existing = doc;
                updated += 1;
            }
        }
        self.save(kb_id, &index)?;
        Ok(updated)
    }

    /// Delete documents by id.  Returns how many were removed.
    pub fn delete_documents(&self, kb_id: &str, ids: &[String]) -> Result<usize, HubError> {
        let mut index = self.load(kb_id)?;
        let before = index.documents.len();
        index.documents.retain(|d| !ids.contains(&d.id));
        let removed = before - index.documents.len();
        self.save(kb_id, &index)?;
        Ok(removed)
    }

    /// Rebuild the index from every Markdown file under `kb_root`.
    /// Document ids are the relative paths, so reindexing is idempotent.
    pub fn reindex(&self, kb_id: &str, kb_root: &Path) -> Result<usize, HubError> {
        let mut documents = Vec::new();
        for entry in WalkDir::new(kb_root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(kb_root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            let text = std::fs::read_to_string(entry.path()).unwrap_or_default();
            documents.push(VectorDoc {
                id: rel.clone(),
                path: rel,
                text,
            });
        }
        let count = documents.len();
        self.save(kb_id, &IndexDoc { documents })?;
        info!(kb_id, count, "reindexed KB");
        Ok(count)
    }

    /// Search the index.  Hits are ordered by descending score; zero-score
    /// documents are omitted.
    pub fn search(&self, kb_id: &str, query: &str, top_k: usize) -> Result<Vec<VectorHit>, HubError> {
        let index = self.load(kb_id)?;
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits: Vec<VectorHit> = index
            .documents
            .into_iter()
            .filter_map(|d| {
                let score = score(&query_tokens, &d.text);
                if score <= 0.0 {
                    return None;
                }
                let snippet: String = d.text.chars().take(SNIPPET_CHARS).collect();
                Some(VectorHit {
                    id: d.id,
                    path: d.path,
                    score,
                    snippet,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        debug!(kb_id, query, hits = hits.len(), "vector search");
        Ok(hits)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_string)
        .collect()
}

/// Term-frequency score normalized by document length.
fn score(query_tokens: &[String], text: &str) -> f64 {
    let doc_tokens = tokenize(text);
    if doc_tokens.is_empty() {
        return 0.0;
    }
    let matches: usize = query_tokens
        .iter()
        .map(|q| doc_tokens.iter().filter(|d| *d == q).count())
        .sum();
    matches as f64 / (doc_tokens.len() as f64).sqrt()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
