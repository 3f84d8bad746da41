// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! In-process agent driver: a function-calling loop against an
//! OpenAI-compatible backend.
//!
//! Each round the model either answers (terminal) or requests tool calls;
//! calls in one round are independent and execute concurrently.  Tool
//! failures are fed back as tool results — only a *repeated* identical
//! failing call aborts the run, because a model stuck on the same broken
//! call will not recover by itself.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use quill_config::ServiceMode;
use quill_model::{ChatBackend, ChatMessage, ChatRequest, ToolSpec};
use quill_tools::{build_registry, ToolCall, ToolContext, ToolRegistry};

use super::{
    extract_wiki_relations, AgentDriver, AgentError, AgentInvocation, AgentOutcome,
    ToolTraceEntry,
};

/// Identical failing (name, arguments) pairs tolerated before aborting.
const MAX_REPEATED_FAILURES: u32 = 3;

/// Factory for the per-invocation tool context, injected so the service
/// layer controls hub wiring and tokens.
pub type ContextFactory =
    Arc<dyn Fn(&AgentInvocation) -> Arc<ToolContext> + Send + Sync>;

pub struct InProcessDriver {
    backend: Arc<dyn ChatBackend>,
    make_context: ContextFactory,
}

impl InProcessDriver {
    pub fn new(backend: Arc<dyn ChatBackend>, make_context: ContextFactory) -> Self {
        Self {
            backend,
            make_context,
        }
    }

    fn build_messages(invocation: &AgentInvocation) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(system_prompt(invocation.mode))];
        for turn in &invocation.context {
            messages.push(ChatMessage::user(turn.user.clone()));
            messages.push(ChatMessage::assistant(turn.assistant.clone()));
        }
        let mut prompt = String::new();
        if !invocation.kb_structure_hint.is_empty() {
            prompt.push_str("Knowledge base layout:\n");
            prompt.push_str(&invocation.kb_structure_hint);
            prompt.push_str("\n\n");
        }
        if !invocation.media.is_empty() {
            prompt.push_str(&format!(
                "[{} attachment(s): {}]\n\n",
                invocation.media.len(),
                invocation
                    .media
                    .iter()
                    .map(|m| m.filename.clone().unwrap_or_else(|| "unnamed".to_string()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        prompt.push_str(&invocation.grouped_text);
        messages.push(ChatMessage::user(prompt));
        messages
    }
}

#[async_trait::async_trait]
impl AgentDriver for InProcessDriver {
    fn name(&self) -> &str {
        "in-process"
    }

    async fn run(&self, invocation: AgentInvocation) -> Result<AgentOutcome, AgentError> {
        let ctx = (self.make_context)(&invocation);
        let registry = build_registry(ctx);
        let tools: Vec<ToolSpec> = registry
            .schemas_for_mode(invocation.mode)
            .into_iter()
            .map(|s| ToolSpec {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();

        let mut messages = Self::build_messages(&invocation);
        let mut outcome = AgentOutcome::default();
        let mut failure_counts: HashMap<String, u32> = HashMap::new();

        for iteration in 0..invocation.max_iterations {
            if tokio::time::Instant::now() >= invocation.deadline {
                return Err(AgentError::Timeout);
            }
            outcome.iterations = iteration + 1;
            let request = ChatRequest {
                messages: messages.clone(),
                tools: tools.clone(),
                temperature: None,
                max_tokens: None,
            };
            let turn = tokio::time::timeout_at(invocation.deadline, self.backend.complete(request))
                .await
                .map_err(|_| AgentError::Timeout)??;
            outcome.usage += turn.usage;

            if !turn.has_tool_calls() {
                outcome.answer = turn.text.unwrap_or_default();
                outcome.relations = extract_wiki_relations(
                    &invocation.kb_root,
                    &[
                        outcome.files_created.clone(),
                        outcome.files_edited.clone(),
                    ]
                    .concat(),
                );
                debug!(
                    iterations = outcome.iterations,
                    files = outcome.files_created.len(),
                    "agent run finished"
                );
                return Ok(outcome);
            }

            messages.push(ChatMessage::Assistant {
                content: turn.text.clone(),
                tool_calls: turn.tool_calls.clone(),
            });

            // Independent calls within one round run concurrently.
            let executions = turn.tool_calls.iter().map(|req| {
                let call = ToolCall {
                    id: req.id.clone(),
                    name: req.name.clone(),
                    args: req.arguments.clone(),
                };
                execute_one(&registry, invocation.mode, call)
            });
            let results = join_all(executions).await;

            for (req, output) in turn.tool_calls.iter().zip(results) {
                record_effect(&invocation, &mut outcome, &req.name, &req.arguments, !output.is_error);
                outcome.tool_trace.push(ToolTraceEntry {
                    tool: req.name.clone(),
                    summary: output.content.chars().take(120).collect(),
                    ok: !output.is_error,
                });

                if output.is_error {
                    let signature = format!("{}:{}", req.name, req.arguments);
                    let count = failure_counts.entry(signature).or_insert(0);
                    *count += 1;
                    if *count >= MAX_REPEATED_FAILURES {
                        warn!(tool = %req.name, "aborting: repeated identical tool failure");
                        return Err(AgentError::ToolLoop(format!(
                            "{} failed {count} times with the same arguments",
                            req.name
                        )));
                    }
                }
                messages.push(ChatMessage::tool_result(&output.call_id, &output.content));
            }
        }

        Err(AgentError::BudgetExceeded)
    }
}

async fn execute_one(
    registry: &ToolRegistry,
    mode: ServiceMode,
    call: ToolCall,
) -> quill_tools::ToolOutput {
    registry.execute(mode, &call).await
}

/// Track which KB paths a successful mutating call touched, relative to
/// the KB root.
fn record_effect(
    invocation: &AgentInvocation,
    outcome: &mut AgentOutcome,
    tool: &str,
    args: &serde_json::Value,
    ok: bool,
) {
    if !ok {
        return;
    }
    let prefix = invocation
        .working_dir
        .strip_prefix(&invocation.kb_root)
        .unwrap_or_else(|_| std::path::Path::new(""));
    let rel = |key: &str| -> Option<String> {
        let raw = args.get(key)?.as_str()?;
        let clean = quill_config::paths::lexical_clean(std::path::Path::new(raw));
        Some(prefix.join(clean).to_string_lossy().to_string())
    };

    match tool {
        "file_create" => {
            if let Some(p) = rel("path") {
                outcome.files_created.push(p);
            }
        }
        "file_edit" => {
            if let Some(p) = rel("path") {
                outcome.files_edited.push(p);
            }
        }
        "file_delete" => {
            if let Some(p) = rel("path") {
                outcome.files_deleted.push(p);
            }
        }
        "file_move" => {
            if let Some(p) = rel("src") {
                outcome.files_deleted.push(p);
            }
            if let Some(p) = rel("dst") {
                outcome.files_created.push(p);
            }
        }
        "folder_create" => {
            if let Some(p) = rel("path") {
                outcome.folders_created.push(p);
            }
        }
        _ => {}
    }
}

/// Per-mode system prompts.  The note prompt pins the file-format
/// contract; ask forbids mutation outright; task is open-ended.
fn system_prompt(mode: ServiceMode) -> String {
    let common = "You maintain a personal Markdown knowledge base. Paths you pass to tools \
                  are relative to your working directory. Notes live under category folders \
                  and are named YYYY-MM-DD-slug.md with a YAML front-matter block containing \
                  title, category and created_at.";
    match mode {
        ServiceMode::Note => format!(
            "{common} Turn the user's message into exactly one well-structured note: pick a \
             category, create the file with file_create, and link related concepts with \
             [[wiki links]]. Use kb_vector_search to find related notes first. When done, \
             reply with a one-line summary of what you saved."
        ),
        ServiceMode::Ask => format!(
            "{common} Answer the user's question from the knowledge base. Use kb_list, \
             kb_read, kb_vector_search and your memory. You cannot and must not modify \
             any files. Reply with the answer in Markdown."
        ),
        ServiceMode::Task => format!(
            "{common} Carry out the user's task against the knowledge base using the \
             available tools. Plan first with plan_todo for multi-step work. Reply with \
             a short report of what you did."
        ),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Turn;
    use quill_model::{ModelTurn, ScriptedBackend};
    use serde_json::json;
    use std::time::Duration;

    fn make_invocation(dir: &std::path::Path, mode: ServiceMode) -> AgentInvocation {
        std::fs::create_dir_all(dir.join("topics")).unwrap();
        AgentInvocation {
            mode,
            user_id: 1,
            kb_name: "kb1".into(),
            kb_root: dir.to_path_buf(),
            working_dir: dir.join("topics"),
            grouped_text: "Article about neural networks https://example.com/nn".into(),
            media: vec![],
            kb_structure_hint: String::new(),
            context: vec![],
            deadline: tokio::time::Instant::now() + Duration::from_secs(30),
            max_iterations: 10,
        }
    }

    fn driver(backend: ScriptedBackend) -> InProcessDriver {
        let factory: ContextFactory = Arc::new(|inv: &AgentInvocation| {
            Arc::new(ToolContext {
                user_id: inv.user_id,
                kb_name: inv.kb_name.clone(),
                kb_root: inv.kb_root.clone(),
                working_dir: inv.working_dir.clone(),
                hub: None,
                github_token: None,
                web_search_key: None,
                vector_top_k: 5,
                http_timeout: Duration::from_secs(5),
            })
        });
        InProcessDriver::new(Arc::new(backend), factory)
    }

    #[tokio::test]
    async fn text_only_turn_finishes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(ScriptedBackend::always_text("All done."));
        let outcome = d.run(make_invocation(dir.path(), ServiceMode::Ask)).await.unwrap();
        assert_eq!(outcome.answer, "All done.");
        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.has_mutations());
    }

    #[tokio::test]
    async fn tool_call_executes_and_effect_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(ScriptedBackend::tool_then_text(
            "c1",
            "file_create",
            json!({"path": "tech/2026-08-01-neural-networks.md", "content": "---\ntitle: NN\ncategory: tech\ncreated_at: 2026-08-01T00:00:00Z\n---\n\nSee [[deep learning]]."}),
            "Saved a note about neural networks.",
        ));
        let outcome = d
            .run(make_invocation(dir.path(), ServiceMode::Note))
            .await
            .unwrap();
        assert_eq!(
            outcome.files_created,
            vec!["topics/tech/2026-08-01-neural-networks.md"]
        );
        assert!(dir
            .path()
            .join("topics/tech/2026-08-01-neural-networks.md")
            .is_file());
        assert_eq!(outcome.iterations, 2);
        // The wiki link inside the created file is reported.
        assert_eq!(outcome.relations.len(), 1);
        assert_eq!(outcome.relations[0].target, "deep learning");
        assert!(outcome.tool_trace.iter().any(|t| t.tool == "file_create" && t.ok));
    }

    #[tokio::test]
    async fn whitelist_blocks_mutation_in_ask_mode() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(ScriptedBackend::tool_then_text(
            "c1",
            "file_create",
            json!({"path": "x.md", "content": "x"}),
            "tried anyway",
        ));
        let outcome = d
            .run(make_invocation(dir.path(), ServiceMode::Ask))
            .await
            .unwrap();
        // The tool call failed inside the loop; no file, no effect.
        assert!(!outcome.has_mutations());
        assert!(!dir.path().join("topics/x.md").exists());
        assert!(outcome.tool_trace.iter().any(|t| !t.ok));
    }

    #[tokio::test]
    async fn path_traversal_is_rejected_and_loop_continues() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(ScriptedBackend::tool_then_text(
            "c1",
            "file_create",
            json!({"path": "../../etc/passwd", "content": "x"}),
            "recovered",
        ));
        let outcome = d
            .run(make_invocation(dir.path(), ServiceMode::Note))
            .await
            .unwrap();
        assert_eq!(outcome.answer, "recovered");
        assert!(!outcome.has_mutations());
        let failed = outcome.tool_trace.iter().find(|t| !t.ok).unwrap();
        assert!(failed.summary.contains("InvalidPath"));
    }

    #[tokio::test]
    async fn repeated_identical_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let bad_call = || ModelTurn::tool_call("c", "kb_read", json!({"path": "missing.md"}));
        let d = driver(ScriptedBackend::new(vec![bad_call(), bad_call(), bad_call(), bad_call()]));
        let err = d
            .run(make_invocation(dir.path(), ServiceMode::Ask))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolLoop(_)));
    }

    #[tokio::test]
    async fn iteration_budget_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        // Vary the path every round so the failure-signature guard does not
        // fire first; the budget must be what stops the loop.
        let turns: Vec<ModelTurn> = (0..20)
            .map(|i| {
                ModelTurn::tool_call("c", "kb_read", json!({"path": format!("m{i}.md")}))
            })
            .collect();
        let d = driver(ScriptedBackend::new(turns));
        let mut inv = make_invocation(dir.path(), ServiceMode::Ask);
        inv.max_iterations = 3;
        let err = d.run(inv).await.unwrap_err();
        assert!(matches!(err, AgentError::BudgetExceeded));
    }

    #[tokio::test]
    async fn deadline_yields_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(ScriptedBackend::always_text("late"));
        let mut inv = make_invocation(dir.path(), ServiceMode::Ask);
        inv.deadline = tokio::time::Instant::now() - Duration::from_secs(1);
        let err = d.run(inv).await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout));
    }

    #[tokio::test]
    async fn context_turns_are_included_in_messages() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::always_text("ok");
        let last_request = backend.last_request.clone();
        let d = driver(backend);
        let mut inv = make_invocation(dir.path(), ServiceMode::Ask);
        inv.context = vec![Turn {
            user: "earlier question".into(),
            assistant: "earlier answer".into(),
        }];
        d.run(inv).await.unwrap();
        let req = last_request.lock().unwrap().clone().unwrap();
        // system + 2 context turns + current user message
        assert_eq!(req.messages.len(), 4);
    }

    #[test]
    fn mode_prompts_differ() {
        let note = system_prompt(ServiceMode::Note);
        let ask = system_prompt(ServiceMode::Ask);
        assert!(note.contains("file_create"));
        assert!(ask.contains("must not modify"));
        assert_ne!(note, ask);
    }
}
