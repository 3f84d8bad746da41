// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use quill_config::ServiceMode;

use crate::builtin::{ALL_MODES, ASK_TASK};
use crate::context::ToolContext;
use crate::sandbox;
use crate::tool::{require_str, Tool, ToolCall, ToolOutput};

/// Read caps keep a single tool result from flooding the model context.
const READ_MAX_CHARS: usize = 50_000;
const LIST_MAX_ENTRIES: usize = 200;

pub struct KbReadTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for KbReadTool {
    fn name(&self) -> &str {
        "kb_read"
    }

    fn description(&self) -> &str {
        "Read a file from the knowledge base working tree."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path relative to the working directory"}
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        ALL_MODES
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match require_str(call, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let resolved = match sandbox::resolve(&self.ctx.working_dir, &path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        debug!(path = %resolved.display(), "kb_read");
        match tokio::fs::read_to_string(&resolved).await {
            Ok(text) if text.chars().count() > READ_MAX_CHARS => {
                let truncated: String = text.chars().take(READ_MAX_CHARS).collect();
                ToolOutput::ok(
                    &call.id,
                    format!("{truncated}\n...[truncated at {READ_MAX_CHARS} chars]"),
                )
            }
            Ok(text) => ToolOutput::ok(&call.id, text),
            Err(e) => ToolOutput::err(
                &call.id,
                format!("cannot read {}: {e}", self.ctx.rel_to_kb(&resolved)),
            ),
        }
    }
}

pub struct KbListTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for KbListTool {
    fn name(&self) -> &str {
        "kb_list"
    }

    fn description(&self) -> &str {
        "List the contents of a knowledge-base directory. Directories carry a \
         trailing slash. Omit 'dir' to list the working-directory root."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dir": {"type": "string", "description": "Directory relative to the working directory (default: root)"}
            },
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        ASK_TASK
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let dir = call
            .args
            .get("dir")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        let resolved = if dir.is_empty() || dir == "." {
            self.ctx.working_dir.clone()
        } else {
            match sandbox::resolve(&self.ctx.working_dir, &dir) {
                Ok(p) => p,
                Err(e) => return ToolOutput::err(&call.id, e),
            }
        };
        debug!(path = %resolved.display(), "kb_list");

        let mut read_dir = match tokio::fs::read_dir(&resolved).await {
            Ok(rd) => rd,
            Err(e) => {
                return ToolOutput::err(
                    &call.id,
                    format!("cannot list {}: {e}", self.ctx.rel_to_kb(&resolved)),
                )
            }
        };
        let mut entries: Vec<String> = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name == ".git" || name == ".sync.lock" {
                continue;
            }
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        let truncated = entries.len() > LIST_MAX_ENTRIES;
        entries.truncate(LIST_MAX_ENTRIES);

        if entries.is_empty() {
            return ToolOutput::ok(&call.id, "(empty directory)");
        }
        let mut out = entries.join("\n");
        if truncated {
            out.push_str(&format!("\n...[truncated at {LIST_MAX_ENTRIES} entries]"));
        }
        ToolOutput::ok(&call.id, out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> (tempfile::TempDir, Arc<ToolContext>) {
        let dir = tempfile::tempdir().unwrap();
        let kb_root = dir.path().to_path_buf();
        std::fs::create_dir_all(kb_root.join("topics")).unwrap();
        let ctx = Arc::new(ToolContext {
            user_id: 1,
            kb_name: "kb1".into(),
            working_dir: kb_root.join("topics"),
            kb_root,
            hub: None,
            github_token: None,
            web_search_key: None,
            vector_top_k: 5,
            http_timeout: std::time::Duration::from_secs(5),
        });
        (dir, ctx)
    }

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: "kb".into(),
            args,
        }
    }

    #[tokio::test]
    async fn read_returns_content() {
        let (_d, ctx) = ctx();
        std::fs::write(ctx.working_dir.join("a.md"), "# Title\nBody").unwrap();
        let t = KbReadTool { ctx };
        let out = t.execute(&call(json!({"path": "a.md"}))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("# Title"));
    }

    #[tokio::test]
    async fn read_missing_file_is_error() {
        let (_d, ctx) = ctx();
        let t = KbReadTool { ctx };
        let out = t.execute(&call(json!({"path": "missing.md"}))).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn read_rejects_traversal() {
        let (_d, ctx) = ctx();
        let t = KbReadTool { ctx };
        let out = t.execute(&call(json!({"path": "../secrets.md"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("InvalidPath"));
    }

    #[tokio::test]
    async fn list_marks_directories() {
        let (_d, ctx) = ctx();
        std::fs::create_dir(ctx.working_dir.join("tech")).unwrap();
        std::fs::write(ctx.working_dir.join("note.md"), "x").unwrap();
        let t = KbListTool { ctx };
        let out = t.execute(&call(json!({}))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("tech/"));
        assert!(out.content.contains("note.md"));
    }

    #[tokio::test]
    async fn list_skips_internal_entries() {
        let (_d, ctx) = ctx();
        std::fs::create_dir(ctx.working_dir.join(".git")).unwrap();
        std::fs::write(ctx.working_dir.join(".sync.lock"), "1").unwrap();
        let t = KbListTool { ctx };
        let out = t.execute(&call(json!({}))).await;
        assert!(!out.content.contains(".git"));
        assert!(!out.content.contains(".sync.lock"));
    }

    #[tokio::test]
    async fn empty_directory_reported() {
        let (_d, ctx) = ctx();
        let t = KbListTool { ctx };
        let out = t.execute(&call(json!({}))).await;
        assert_eq!(out.content, "(empty directory)");
    }

    #[test]
    fn kb_read_available_everywhere_kb_list_not_in_note() {
        let (_d, ctx) = ctx();
        assert!(KbReadTool { ctx: ctx.clone() }
            .modes()
            .contains(&ServiceMode::Note));
        assert!(!KbListTool { ctx }.modes().contains(&ServiceMode::Note));
    }
}
