// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use quill_config::ServiceMode;

use crate::builtin::TASK_ONLY;
use crate::context::ToolContext;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Advisory planning tool: the model records its intended steps, the
/// service logs them.  No side effects beyond the log.
pub struct PlanTodoTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for PlanTodoTool {
    fn name(&self) -> &str {
        "plan_todo"
    }

    fn description(&self) -> &str {
        "Record the plan for a multi-step task as a list of short items. Purely \
         advisory; use it before starting non-trivial work."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Ordered plan steps"
                }
            },
            "required": ["items"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        TASK_ONLY
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let items: Vec<String> = match call.args.get("items").and_then(Value::as_array) {
            Some(arr) => arr
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'items'"),
        };
        if items.is_empty() {
            return ToolOutput::err(&call.id, "plan must contain at least one item");
        }
        info!(user_id = self.ctx.user_id, plan = ?items, "agent plan");
        ToolOutput::ok(&call.id, format!("recorded {} plan items", items.len()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Arc<ToolContext> {
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

    #[tokio::test]
    async fn records_items() {
        let t = PlanTodoTool { ctx: ctx() };
        let out = t
            .execute(&ToolCall {
                id: "p".into(),
                name: "plan_todo".into(),
                args: json!({"items": ["read existing notes", "draft summary"]}),
            })
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("2 plan items"));
    }

    #[tokio::test]
    async fn empty_plan_is_an_error() {
        let t = PlanTodoTool { ctx: ctx() };
        let out = t
            .execute(&ToolCall {
                id: "p".into(),
                name: "plan_todo".into(),
                args: json!({"items": []}),
            })
            .await;
        assert!(out.is_error);
    }
}
