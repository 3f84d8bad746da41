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

pub struct FolderCreateTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for FolderCreateTool {
    fn name(&self) -> &str {
        "folder_create"
    }

    fn description(&self) -> &str {
        "Create a directory (and any missing parents) under the knowledge base."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory path relative to the working directory"}
            },
            "required": ["path"],
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
        let resolved = match sandbox::resolve(&self.ctx.working_dir, &path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        debug!(path = %resolved.display(), "folder_create");
        match tokio::fs::create_dir_all(&resolved).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!("created folder {}", self.ctx.rel_to_kb(&resolved)),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("create error: {e}")),
        }
    }
}

pub struct FolderDeleteTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for FolderDeleteTool {
    fn name(&self) -> &str {
        "folder_delete"
    }

    fn description(&self) -> &str {
        "Delete a directory and its contents. The knowledge-base root itself can \
         never be deleted."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory path relative to the working directory"}
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
        if sandbox::is_root(&self.ctx.working_dir, &resolved)
            || sandbox::is_root(&self.ctx.kb_root, &resolved)
        {
            return ToolOutput::err(&call.id, "InvalidPath: the root cannot be deleted");
        }
        if !resolved.is_dir() {
            return ToolOutput::err(
                &call.id,
                format!("no such folder: {}", self.ctx.rel_to_kb(&resolved)),
            );
        }
        debug!(path = %resolved.display(), "folder_delete");
        match tokio::fs::remove_dir_all(&resolved).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!("deleted folder {}", self.ctx.rel_to_kb(&resolved)),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("delete error: {e}")),
        }
    }
}

pub struct FolderMoveTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for FolderMoveTool {
    fn name(&self) -> &str {
        "folder_move"
    }

    fn description(&self) -> &str {
        "Move or rename a directory inside the knowledge base. Destination parents \
         are created automatically."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "src": {"type": "string", "description": "Existing directory path"},
                "dst": {"type": "string", "description": "New directory path"}
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
        if sandbox::is_root(&self.ctx.working_dir, &src_resolved) {
            return ToolOutput::err(&call.id, "InvalidPath: the root cannot be moved");
        }
        if !src_resolved.is_dir() {
            return ToolOutput::err(
                &call.id,
                format!("no such folder: {}", self.ctx.rel_to_kb(&src_resolved)),
            );
        }
        debug!(src = %src_resolved.display(), dst = %dst_resolved.display(), "folder_move");
        if let Some(parent) = dst_resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("create parents: {e}"));
            }
        }
        match tokio::fs::rename(&src_resolved, &dst_resolved).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!(
                    "moved folder {} -> {}",
                    self.ctx.rel_to_kb(&src_resolved),
                    self.ctx.rel_to_kb(&dst_resolved)
                ),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("move error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
