// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tools delegated to the MCP hub: KB vector search and the per-user
//! memory surface.  When the hub is unreachable these tools fail softly —
//! the agent is told the capability is unavailable and the service
//! continues without it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use quill_config::ServiceMode;
use quill_hub::HubClient;

use crate::builtin::{ALL_MODES, NOTE_TASK};
use crate::context::ToolContext;
use crate::tool::{require_str, Tool, ToolCall, ToolOutput};

fn hub_or_err<'a>(
    ctx: &'a ToolContext,
    call_id: &str,
) -> Result<&'a Arc<HubClient>, ToolOutput> {
    ctx.hub.as_ref().ok_or_else(|| {
        ToolOutput::err(
            call_id,
            "McpUnavailable: the hub is not connected; this capability is temporarily unavailable",
        )
    })
}

pub struct KbVectorSearchTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for KbVectorSearchTool {
    fn name(&self) -> &str {
        "kb_vector_search"
    }

    fn description(&self) -> &str {
        "Semantic search across the knowledge base. Returns the most relevant \
         notes with path, score, and snippet."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look for"},
                "top_k": {"type": "integer", "description": "Result count (default from settings)"}
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        ALL_MODES
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = match require_str(call, "query") {
            Ok(q) => q,
            Err(e) => return e,
        };
        let hub = match hub_or_err(&self.ctx, &call.id) {
            Ok(h) => h,
            Err(e) => return e,
        };
        let top_k = call
            .args
            .get("top_k")
            .and_then(Value::as_u64)
            .map(|k| k as usize)
            .unwrap_or(self.ctx.vector_top_k);
        debug!(query = %query, top_k, "kb_vector_search");

        match hub
            .vector_search(&self.ctx.kb_name, &query, top_k, Some(self.ctx.user_id))
            .await
        {
            Ok(results) if results.is_empty() => ToolOutput::ok(&call.id, "(no matches)"),
            Ok(results) => {
                let lines: Vec<String> = results
                    .iter()
                    .map(|r| {
                        format!(
                            "{} (score {:.2})\n   {}",
                            r.get("path").and_then(Value::as_str).unwrap_or("?"),
                            r.get("score").and_then(Value::as_f64).unwrap_or(0.0),
                            r.get("snippet").and_then(Value::as_str).unwrap_or(""),
                        )
                    })
                    .collect();
                ToolOutput::ok(&call.id, lines.join("\n"))
            }
            Err(e) => ToolOutput::err(&call.id, format!("McpUnavailable: {e}")),
        }
    }
}

pub struct MemoryStoreTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for MemoryStoreTool {
    fn name(&self) -> &str {
        "mcp_memory_store"
    }

    fn description(&self) -> &str {
        "Persist a fact or observation to the user's long-term memory. Optional \
         category groups related memories."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "What to remember"},
                "category": {"type": "string", "description": "Optional grouping label"}
            },
            "required": ["content"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        NOTE_TASK
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let content = match require_str(call, "content") {
            Ok(c) => c,
            Err(e) => return e,
        };
        let hub = match hub_or_err(&self.ctx, &call.id) {
            Ok(h) => h,
            Err(e) => return e,
        };
        let category = call.args.get("category").and_then(Value::as_str);
        match hub.store_memory(self.ctx.user_id, &content, category).await {
            Ok(id) => ToolOutput::ok(&call.id, format!("stored memory {id}")),
            Err(e) => ToolOutput::err(&call.id, format!("McpUnavailable: {e}")),
        }
    }
}

pub struct MemoryRetrieveTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for MemoryRetrieveTool {
    fn name(&self) -> &str {
        "mcp_memory_retrieve"
    }

    fn description(&self) -> &str {
        "Search the user's long-term memory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look for"},
                "category": {"type": "string", "description": "Restrict to one category"}
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        ALL_MODES
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = match require_str(call, "query") {
            Ok(q) => q,
            Err(e) => return e,
        };
        let hub = match hub_or_err(&self.ctx, &call.id) {
            Ok(h) => h,
            Err(e) => return e,
        };
        let category = call.args.get("category").and_then(Value::as_str);
        match hub
            .retrieve_memory(self.ctx.user_id, &query, category)
            .await
        {
            Ok(results) if results.is_empty() => ToolOutput::ok(&call.id, "(no memories match)"),
            Ok(results) => {
                let lines: Vec<String> = results
                    .iter()
                    .map(|r| {
                        format!(
                            "[{}] {}",
                            r.get("category").and_then(Value::as_str).unwrap_or("?"),
                            r.get("content").and_then(Value::as_str).unwrap_or(""),
                        )
                    })
                    .collect();
                ToolOutput::ok(&call.id, lines.join("\n"))
            }
            Err(e) => ToolOutput::err(&call.id, format!("McpUnavailable: {e}")),
        }
    }
}

pub struct MemoryListCategoriesTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for MemoryListCategoriesTool {
    fn name(&self) -> &str {
        "mcp_memory_list_categories"
    }

    fn description(&self) -> &str {
        "List the categories present in the user's long-term memory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        NOTE_TASK
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let hub = match hub_or_err(&self.ctx, &call.id) {
            Ok(h) => h,
            Err(e) => return e,
        };
        match hub.list_categories(self.ctx.user_id).await {
            Ok(cats) if cats.is_empty() => ToolOutput::ok(&call.id, "(no categories)"),
            Ok(cats) => ToolOutput::ok(&call.id, cats.join("\n")),
            Err(e) => ToolOutput::err(&call.id, format!("McpUnavailable: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_without_hub() -> Arc<ToolContext> {
        Arc::new(ToolContext {
            user_id: 1,
            kb_name: "kb1".into(),
            kb_root: std::path::PathBuf::from("/tmp"),
            working_dir: std::path::PathBuf::from("/tmp"),
            hub: None,
            github_token: None,
            web_search_key: None,
            vector_top_k: 5,
            http_timeout: std::time::Duration::from_secs(2),
        })
    }

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "h1".into(),
            name: "hub".into(),
            args,
        }
    }

    #[tokio::test]
    async fn vector_search_degrades_without_hub() {
        let t = KbVectorSearchTool {
            ctx: ctx_without_hub(),
        };
        let out = t.execute(&call(json!({"query": "x"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("McpUnavailable"));
    }

    #[tokio::test]
    async fn memory_tools_degrade_without_hub() {
        let store = MemoryStoreTool {
            ctx: ctx_without_hub(),
        };
        let out = store.execute(&call(json!({"content": "x"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("McpUnavailable"));

        let list = MemoryListCategoriesTool {
            ctx: ctx_without_hub(),
        };
        let out = list.execute(&call(json!({}))).await;
        assert!(out.is_error);
    }

    #[test]
    fn retrieve_is_everywhere_store_is_not_in_ask() {
        let retrieve = MemoryRetrieveTool {
            ctx: ctx_without_hub(),
        };
        assert!(retrieve.modes().contains(&ServiceMode::Ask));
        let store = MemoryStoreTool {
            ctx: ctx_without_hub(),
        };
        assert!(!store.modes().contains(&ServiceMode::Ask));
    }
}
