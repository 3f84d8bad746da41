// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use quill_config::ServiceMode;

use crate::builtin::{NOTE_TASK, TASK_ONLY};
use crate::context::ToolContext;
use crate::sandbox;
use crate::tool::{require_str, Tool, ToolCall, ToolOutput};

pub struct FileCreateTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for FileCreateTool {
    fn name(&self) -> &str {
        "file_create"
    }

    fn description(&self) -> &str {
        "Create a new file under the knowledge base. Parent directories are created \
         automatically. Fails if the file already exists; use file_edit to change \
         existing files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the working directory"},
                "content": {"type": "string", "description": "Full file content"}
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        NOTE_TASK
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match require_str(call, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = match require_str(call, "content") {
            Ok(c) => c,
            Err(e) => return e,
        };
        let resolved = match sandbox::resolve(&self.ctx.working_dir, &path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        if resolved.exists() {
            return ToolOutput::err(
                &call.id,
                format!("file already exists: {}", self.ctx.rel_to_kb(&resolved)),
            );
        }
        debug!(path = %resolved.display(), "file_create");
        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("create parents: {e}"));
            }
        }
        match tokio::fs::write(&resolved, content.as_bytes()).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!("created {}", self.ctx.rel_to_kb(&resolved)),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

pub struct FileEditTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for FileEditTool {
    fn name(&self) -> &str {
        "file_edit"
    }

    fn description(&self) -> &str {
        "Replace the content of an existing file. Fails if the file does not exist; \
         use file_create for new files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the working directory"},
                "content": {"type": "string", "description": "Replacement content"}
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        NOTE_TASK
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match require_str(call, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = match require_str(call, "content") {
            Ok(c) => c,
            Err(e) => return e,
        };
        let resolved = match sandbox::resolve(&self.ctx.working_dir, &path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        if !resolved.is_file() {
            return ToolOutput::err(
                &call.id,
                format!("no such file: {}", self.ctx.rel_to_kb(&resolved)),
            );
        }
        debug!(path = %resolved.display(), "file_edit");
        match tokio::fs::write(&resolved, content.as_bytes()).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("edited {}", self.ctx.rel_to_kb(&resolved))),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

pub struct FileDeleteTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for FileDeleteTool {
    fn name(&self) -> &str {
        "file_delete"
    }

    fn description(&self) -> &str {
        "Delete an existing file from the knowledge base."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the working directory"}
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        TASK_ONLY
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
        if !resolved.is_file() {
            return ToolOutput::err(
                &call.id,
                format!("no such file: {}", self.ctx.rel_to_kb(&resolved)),
            );
        }
        debug!(path = %resolved.display(), "file_delete");
        match tokio::fs::remove_file(&resolved).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!("deleted {}", self.ctx.rel_to_kb(&resolved)),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("delete error: {e}")),
        }
    }
}

pub struct FileMoveTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for FileMoveTool {
    fn name(&self) -> &str {
        "file_move"
    }

    fn description(&self) -> &str {
        "Move or rename a file inside the knowledge base. Destination parents are \
         created automatically."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "src": {"type": "string", "description": "Existing file path"},
                "dst": {"type": "string", "description": "New file path"}
            },
            "required": ["src", "dst"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        NOTE_TASK
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let src = match require_str(call, "src") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let dst = match require_str(call, "dst") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let src_resolved = match sandbox::resolve(&self.ctx.working_dir, &src) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        let dst_resolved = match sandbox::resolve(&self.ctx.working_dir, &dst) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        if !src_resolved.is_file() {
            return ToolOutput::err(
                &call.id,
                format!("no such file: {}", self.ctx.rel_to_kb(&src_resolved)),
            );
        }
        debug!(src = %src_resolved.display(), dst = %dst_resolved.display(), "file_move");
        if let Some(parent) = dst_resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("create parents: {e}"));
            }
        }
        match tokio::fs::rename(&src_resolved, &dst_resolved).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!(
                    "moved {} -> {}",
                    self.ctx.rel_to_kb(&src_resolved),
                    self.ctx.rel_to_kb(&dst_resolved)
                ),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("move error: {e}")),
        }
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
            name: "fs".into(),
            args,
        }
    }

    #[tokio::test]
    async fn create_writes_file_and_reports_kb_relative_path() {
        let (_d, ctx) = ctx();
        let t = FileCreateTool { ctx: ctx.clone() };
        let out = t
            .execute(&call(json!({"path": "tech/note.md", "content": "hello"})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(out.content, "created topics/tech/note.md");
        assert!(ctx.working_dir.join("tech/note.md").is_file());
    }

    #[tokio::test]
    async fn create_refuses_existing_file() {
        let (_d, ctx) = ctx();
        std::fs::write(ctx.working_dir.join("a.md"), "x").unwrap();
        let t = FileCreateTool { ctx };
        let out = t
            .execute(&call(json!({"path": "a.md", "content": "y"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("already exists"));
    }

    #[tokio::test]
    async fn traversal_is_rejected_without_io() {
        let (_d, ctx) = ctx();
        let t = FileCreateTool { ctx };
        let out = t
            .execute(&call(
                json!({"path": "../../etc/passwd", "content": "x"}),
            ))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("InvalidPath"));
    }

    #[tokio::test]
    async fn edit_requires_existing_file() {
        let (_d, ctx) = ctx();
        let t = FileEditTool { ctx: ctx.clone() };
        let out = t
            .execute(&call(json!({"path": "nope.md", "content": "x"})))
            .await;
        assert!(out.is_error);

        std::fs::write(ctx.working_dir.join("yes.md"), "old").unwrap();
        let t = FileEditTool { ctx: ctx.clone() };
        let out = t
            .execute(&call(json!({"path": "yes.md", "content": "new"})))
            .await;
        assert!(!out.is_error);
        assert_eq!(
            std::fs::read_to_string(ctx.working_dir.join("yes.md")).unwrap(),
            "new"
        );
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let (_d, ctx) = ctx();
        std::fs::write(ctx.working_dir.join("gone.md"), "x").unwrap();
        let t = FileDeleteTool { ctx: ctx.clone() };
        let out = t.execute(&call(json!({"path": "gone.md"}))).await;
        assert!(!out.is_error);
        assert!(!ctx.working_dir.join("gone.md").exists());
    }

    #[tokio::test]
    async fn move_creates_destination_parents() {
        let (_d, ctx) = ctx();
        std::fs::write(ctx.working_dir.join("src.md"), "content").unwrap();
        let t = FileMoveTool { ctx: ctx.clone() };
        let out = t
            .execute(&call(json!({"src": "src.md", "dst": "deep/nest/dst.md"})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(ctx.working_dir.join("deep/nest/dst.md").is_file());
        assert!(!ctx.working_dir.join("src.md").exists());
    }

    #[test]
    fn delete_is_task_only() {
        let (_d, ctx) = ctx();
        let t = FileDeleteTool { ctx };
        assert_eq!(t.modes(), &[ServiceMode::Task]);
    }

    #[test]
    fn create_is_not_available_in_ask_mode() {
        let (_d, ctx) = ctx();
        let t = FileCreateTool { ctx };
        assert!(!t.modes().contains(&ServiceMode::Ask));
    }
}
