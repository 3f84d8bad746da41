// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use quill_config::ServiceMode;

use crate::builtin::{
    FileCreateTool, FileDeleteTool, FileEditTool, FileMoveTool, FolderCreateTool,
    FolderDeleteTool, FolderMoveTool, GitCommandTool, GithubApiTool, KbListTool, KbReadTool,
    KbVectorSearchTool, MemoryListCategoriesTool, MemoryRetrieveTool, MemoryStoreTool,
    PlanTodoTool, WebSearchTool,
};
use crate::context::ToolContext;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// A tool schema – mirrors the model crate's `ToolSpec` but keeps this
/// crate independent from it.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all tools for one invocation context.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Schemas for the tools available in `mode`, sorted by name.
    pub fn schemas_for_mode(&self, mode: ServiceMode) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names_for_mode(&self, mode: ServiceMode) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Execute a call, enforcing the mode whitelist.  A call to a tool that
    /// exists but is not whitelisted for `mode` is rejected the same way as
    /// an unknown tool — the model has no business knowing the difference.
    pub async fn execute(&self, mode: ServiceMode, call: &ToolCall) -> ToolOutput {
        match self.tools.get(&call.name) {
            Some(tool) if tool.modes().contains(&mode) => tool.execute(call).await,
            Some(_) => ToolOutput::err(
                &call.id,
                format!("tool not available in {mode} mode: {}", call.name),
            ),
            None => ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the full registry for one invocation context.
pub fn build_registry(ctx: Arc<ToolContext>) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(FileCreateTool { ctx: ctx.clone() });
    reg.register(FileEditTool { ctx: ctx.clone() });
    reg.register(FileDeleteTool { ctx: ctx.clone() });
    reg.register(FileMoveTool { ctx: ctx.clone() });
    reg.register(FolderCreateTool { ctx: ctx.clone() });
    reg.register(FolderDeleteTool { ctx: ctx.clone() });
    reg.register(FolderMoveTool { ctx: ctx.clone() });
    reg.register(KbReadTool { ctx: ctx.clone() });
    reg.register(KbListTool { ctx: ctx.clone() });
    reg.register(KbVectorSearchTool { ctx: ctx.clone() });
    reg.register(MemoryStoreTool { ctx: ctx.clone() });
    reg.register(MemoryRetrieveTool { ctx: ctx.clone() });
    reg.register(MemoryListCategoriesTool { ctx: ctx.clone() });
    reg.register(WebSearchTool { ctx: ctx.clone() });
    reg.register(GitCommandTool { ctx: ctx.clone() });
    reg.register(GithubApiTool { ctx: ctx.clone() });
    reg.register(PlanTodoTool { ctx });
    reg
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> (tempfile::TempDir, ToolRegistry) {
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
            http_timeout: std::time::Duration::from_secs(2),
        });
        (dir, build_registry(ctx))
    }

    #[test]
    fn task_mode_has_the_full_set() {
        let (_d, reg) = registry();
        let names = reg.names_for_mode(ServiceMode::Task);
        for expected in [
            "file_create",
            "file_edit",
            "file_delete",
            "file_move",
            "folder_create",
            "folder_delete",
            "folder_move",
            "git_command",
            "github_api",
            "kb_list",
            "kb_read",
            "kb_vector_search",
            "mcp_memory_list_categories",
            "mcp_memory_retrieve",
            "mcp_memory_store",
            "plan_todo",
            "web_search",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn ask_mode_has_no_mutating_or_git_tools() {
        let (_d, reg) = registry();
        let names = reg.names_for_mode(ServiceMode::Ask);
        for forbidden in [
            "file_create",
            "file_edit",
            "file_delete",
            "file_move",
            "folder_create",
            "folder_delete",
            "folder_move",
            "git_command",
            "github_api",
            "mcp_memory_store",
        ] {
            assert!(!names.contains(&forbidden.to_string()), "{forbidden} leaked");
        }
        for expected in [
            "kb_read",
            "kb_list",
            "kb_vector_search",
            "mcp_memory_retrieve",
            "web_search",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn note_mode_can_create_but_not_delete() {
        let (_d, reg) = registry();
        let names = reg.names_for_mode(ServiceMode::Note);
        assert!(names.contains(&"file_create".to_string()));
        assert!(names.contains(&"folder_create".to_string()));
        assert!(!names.contains(&"file_delete".to_string()));
        assert!(!names.contains(&"folder_delete".to_string()));
        assert!(!names.contains(&"git_command".to_string()));
    }

    #[tokio::test]
    async fn execute_enforces_mode_whitelist() {
        let (_d, reg) = registry();
        let call = ToolCall {
            id: "c".into(),
            name: "file_create".into(),
            args: json!({"path": "a.md", "content": "x"}),
        };
        let out = reg.execute(ServiceMode::Ask, &call).await;
        assert!(out.is_error);
        assert!(out.content.contains("not available in ask mode"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_errors() {
        let (_d, reg) = registry();
        let call = ToolCall {
            id: "c".into(),
            name: "rm_rf".into(),
            args: json!({}),
        };
        let out = reg.execute(ServiceMode::Task, &call).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn execute_whitelisted_tool_runs() {
        let (_d, reg) = registry();
        let call = ToolCall {
            id: "c".into(),
            name: "file_create".into(),
            args: json!({"path": "tech/x.md", "content": "hello"}),
        };
        let out = reg.execute(ServiceMode::Note, &call).await;
        assert!(!out.is_error, "{}", out.content);
    }

    #[test]
    fn schemas_are_sorted_and_carry_parameters() {
        let (_d, reg) = registry();
        let schemas = reg.schemas_for_mode(ServiceMode::Task);
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        assert!(schemas.iter().all(|s| s.parameters.is_object()));
    }
}
