// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Subprocess agent driver: shells out to an external agent CLI.
//!
//! The CLI runs its own model/tool loop.  It is launched inside the
//! invocation's working directory, receives the prompt on stdin, and its
//! stdout becomes the answer.  Effects are recovered by diffing a
//! filesystem snapshot taken before and after the run — the CLI receives
//! no runtime tool objects; its MCP tooling comes from the client config
//! the hub wrote at startup, pointed to via `QUILL_MCP_CONFIG`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{
    extract_wiki_relations, AgentDriver, AgentError, AgentInvocation, AgentOutcome,
};

pub struct SubprocessDriver {
    command: String,
    args: Vec<String>,
    /// Path to the hub-written client config, if a bundled hub is running.
    mcp_config: Option<PathBuf>,
}

impl SubprocessDriver {
    pub fn new(command: impl Into<String>, args: Vec<String>, mcp_config: Option<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args,
            mcp_config,
        }
    }
}

/// Relative path → (len, mtime-nanos).  Enough to detect create / edit /
/// delete without hashing whole trees.
type Snapshot = HashMap<String, (u64, u128)>;

fn snapshot(root: &Path) -> Snapshot {
    let mut map = Snapshot::new();
    for entry in walkdir::WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git" && e.file_name() != ".sync.lock")
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        map.insert(rel, (meta.len(), mtime));
    }
    map
}

/// Diff two snapshots into (created, edited, deleted), paths relative to
/// the snapshot root.
fn diff(before: &Snapshot, after: &Snapshot) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut created = Vec::new();
    let mut edited = Vec::new();
    let mut deleted = Vec::new();
    for (path, stat) in after {
        match before.get(path) {
            None => created.push(path.clone()),
            Some(old) if old != stat => edited.push(path.clone()),
            Some(_) => {}
        }
    }
    for path in before.keys() {
        if !after.contains_key(path) {
            deleted.push(path.clone());
        }
    }
    created.sort();
    edited.sort();
    deleted.sort();
    (created, edited, deleted)
}

#[async_trait::async_trait]
impl AgentDriver for SubprocessDriver {
    fn name(&self) -> &str {
        "subprocess"
    }

    async fn run(&self, invocation: AgentInvocation) -> Result<AgentOutcome, AgentError> {
        let before = snapshot(&invocation.kb_root);

        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(config) = &self.mcp_config {
            cmd.env("QUILL_MCP_CONFIG", config);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::Io(format!("spawn {}: {e}", self.command)))?;

        // Prompt on stdin, then close it so the CLI knows input is complete.
        let prompt = build_prompt(&invocation);
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| AgentError::Io("child has no stdin".into()))?;
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| AgentError::Io(format!("write prompt: {e}")))?;
        }

        debug!(command = %self.command, "subprocess agent started");
        let output = tokio::time::timeout_at(invocation.deadline, child.wait_with_output())
            .await
            .map_err(|_| AgentError::Timeout)?
            .map_err(|e| AgentError::Io(format!("wait: {e}")))?;

        if !output.status.success() {
            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .chars()
                .take(500)
                .collect();
            return Err(AgentError::Io(format!(
                "agent CLI exited with {}: {stderr}",
                output.status
            )));
        }

        let after = snapshot(&invocation.kb_root);
        let (created, edited, deleted) = diff(&before, &after);
        info!(
            created = created.len(),
            edited = edited.len(),
            deleted = deleted.len(),
            "subprocess agent finished"
        );

        let mut outcome = AgentOutcome {
            answer: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            files_created: created,
            files_edited: edited,
            files_deleted: deleted,
            iterations: 1,
            ..Default::default()
        };
        outcome.relations = extract_wiki_relations(
            &invocation.kb_root,
            &[outcome.files_created.clone(), outcome.files_edited.clone()].concat(),
        );
        Ok(outcome)
    }
}

fn build_prompt(invocation: &AgentInvocation) -> String {
    let mut prompt = String::new();
    if !invocation.kb_structure_hint.is_empty() {
        prompt.push_str("Knowledge base layout:\n");
        prompt.push_str(&invocation.kb_structure_hint);
        prompt.push_str("\n\n");
    }
    for turn in &invocation.context {
        prompt.push_str(&format!("Q: {}\nA: {}\n\n", turn.user, turn.assistant));
    }
    prompt.push_str(&invocation.grouped_text);
    prompt.push('\n');
    prompt
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
