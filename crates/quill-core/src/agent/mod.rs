// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The agent-invocation contract.
//!
//! A driver receives one [`AgentInvocation`] and returns one
//! [`AgentOutcome`] — the rendered answer plus the structured effect set
//! (files touched, relations found, tool trace, token accounting).  Two
//! production drivers exist behind the trait: the in-process
//! function-calling loop and the subprocess CLI wrapper; tests use the
//! scripted mock.

mod inprocess;
mod mock;
mod subprocess;

pub use inprocess::{ContextFactory, InProcessDriver};
pub use mock::{MockAgentDriver, MockBehaviour};
pub use subprocess::SubprocessDriver;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use quill_chat::MediaRef;
use quill_config::ServiceMode;
use quill_model::Usage;

use crate::context::Turn;

/// Input to one agent run.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub mode: ServiceMode,
    pub user_id: i64,
    pub kb_name: String,
    /// The KB root (Git working tree).
    pub kb_root: PathBuf,
    /// The subtree the agent may modify (`kb_root` or `kb_root/topics`).
    pub working_dir: PathBuf,
    pub grouped_text: String,
    pub media: Vec<MediaRef>,
    /// Lazy snapshot of the directory tree, given to the model as
    /// orientation.
    pub kb_structure_hint: String,
    /// Prior exchanges for ask/task continuity.
    pub context: Vec<Turn>,
    pub deadline: tokio::time::Instant,
    pub max_iterations: u32,
}

/// A reported wiki-style link between notes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub source: String,
    pub target: String,
    pub kind: String,
}

/// One entry of the diagnostic tool trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolTraceEntry {
    pub tool: String,
    pub summary: String,
    pub ok: bool,
}

/// Structured result of one agent run.  Paths are relative to the KB root.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    /// Rendered Markdown answer (empty is legal for the task mode).
    pub answer: String,
    pub files_created: Vec<String>,
    pub files_edited: Vec<String>,
    pub files_deleted: Vec<String>,
    pub folders_created: Vec<String>,
    pub relations: Vec<Relation>,
    pub tool_trace: Vec<ToolTraceEntry>,
    pub usage: Usage,
    pub iterations: u32,
}

impl AgentOutcome {
    pub fn has_mutations(&self) -> bool {
        !self.files_created.is_empty()
            || !self.files_edited.is_empty()
            || !self.files_deleted.is_empty()
            || !self.folders_created.is_empty()
    }

    /// Every file path the commit must cover, deduplicated and sorted.
    pub fn changed_paths(&self) -> Vec<String> {
        let mut set = BTreeSet::new();
        set.extend(self.files_created.iter().cloned());
        set.extend(self.files_edited.iter().cloned());
        set.extend(self.files_deleted.iter().cloned());
        set.into_iter().collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent run exceeded its deadline")]
    Timeout,
    #[error("agent run exceeded its iteration budget")]
    BudgetExceeded,
    #[error("agent repeated a failing tool call: {0}")]
    ToolLoop(String),
    #[error("model backend error: {0}")]
    Backend(#[from] quill_model::ModelError),
    #[error("agent i/o error: {0}")]
    Io(String),
}

/// Uniform contract over the LLM backends.
#[async_trait]
pub trait AgentDriver: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, invocation: AgentInvocation) -> Result<AgentOutcome, AgentError>;
}

/// Scan changed note files for `[[wiki links]]` and report them as
/// relations from the containing file.
pub fn extract_wiki_relations(kb_root: &Path, files: &[String]) -> Vec<Relation> {
    let mut relations = Vec::new();
    for file in files {
        let Ok(text) = std::fs::read_to_string(kb_root.join(file)) else {
            continue;
        };
        let mut rest = text.as_str();
        while let Some(start) = rest.find("[[") {
            let after = &rest[start + 2..];
            match after.find("]]") {
                Some(end) => {
                    let target = after[..end].trim();
                    if !target.is_empty() && !target.contains('\n') {
                        relations.push(Relation {
                            source: file.clone(),
                            target: target.to_string(),
                            kind: "wikilink".to_string(),
                        });
                    }
                    rest = &after[end + 2..];
                }
                None => break,
            }
        }
    }
    relations
}

/// Render a shallow tree listing of the working directory for the model.
pub fn structure_hint(working_dir: &Path) -> String {
    let mut lines = Vec::new();
    for entry in walkdir::WalkDir::new(working_dir)
        .max_depth(3)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git" && e.file_name() != ".sync.lock")
        .filter_map(Result::ok)
    {
        if entry.depth() == 0 {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(working_dir)
            .unwrap_or(entry.path());
        let suffix = if entry.file_type().is_dir() { "/" } else { "" };
        lines.push(format!("{}{suffix}", rel.display()));
        if lines.len() >= 100 {
            lines.push("…".to_string());
            break;
        }
    }
    if lines.is_empty() {
        "(empty)".to_string()
    } else {
        lines.sort();
        lines.join("\n")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
