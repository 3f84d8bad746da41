// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{ChatBackend, ChatRequest, ModelError, ModelTurn, Usage};

/// A pre-scripted backend.  Each call to `complete` pops the next turn from
/// the front of the queue, letting tests specify exact sequences —
/// including tool calls — without network access.
pub struct ScriptedBackend {
    turns: Arc<Mutex<Vec<ModelTurn>>>,
    /// The last request seen, so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<ChatRequest>>>,
}

impl ScriptedBackend {
    pub fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: backend that always answers with a single text turn.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let mut turn = ModelTurn::text(reply);
        turn.usage = Usage {
            input_tokens: 5,
            output_tokens: 5,
        };
        Self::new(vec![turn])
    }

    /// Convenience: one tool call, then a final text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            ModelTurn::tool_call(tool_id, tool_name, args),
            ModelTurn::text(final_text),
        ])
    }

    /// Number of scripted turns not yet consumed.
    pub fn remaining(&self) -> usize {
        self.turns.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn complete(&self, req: ChatRequest) -> Result<ModelTurn, ModelError> {
        *self.last_request.lock().unwrap() = Some(req);
        let mut turns = self.turns.lock().unwrap();
        if turns.is_empty() {
            // Fallback when all scripts are consumed keeps loops terminating.
            return Ok(ModelTurn::text("[no more scripts]"));
        }
        Ok(turns.remove(0))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;

    fn req() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn scripted_turns_pop_in_order() {
        let b = ScriptedBackend::new(vec![ModelTurn::text("one"), ModelTurn::text("two")]);
        assert_eq!(
            b.complete(req()).await.unwrap().text.as_deref(),
            Some("one")
        );
        assert_eq!(
            b.complete(req()).await.unwrap().text.as_deref(),
            Some("two")
        );
        assert_eq!(b.remaining(), 0);
    }

    #[tokio::test]
    async fn exhausted_scripts_fall_back() {
        let b = ScriptedBackend::new(vec![]);
        let turn = b.complete(req()).await.unwrap();
        assert!(turn.text.unwrap().contains("no more scripts"));
    }

    #[tokio::test]
    async fn tool_then_text_sequence() {
        let b = ScriptedBackend::tool_then_text(
            "c1",
            "kb_read",
            serde_json::json!({"path": "a.md"}),
            "done",
        );
        let first = b.complete(req()).await.unwrap();
        assert!(first.has_tool_calls());
        let second = b.complete(req()).await.unwrap();
        assert_eq!(second.text.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn last_request_is_recorded() {
        let b = ScriptedBackend::always_text("ok");
        b.complete(req()).await.unwrap();
        let seen = b.last_request.lock().unwrap();
        assert_eq!(seen.as_ref().unwrap().messages.len(), 1);
    }
}
