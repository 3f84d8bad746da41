// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI-compatible chat completion backend.
//!
//! Many providers speak the same `/chat/completions` wire format; this
//! backend covers all of them through a configurable base URL.  Requests
//! are non-streaming: the service consumes whole turns, so there is nothing
//! to render incrementally.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{ChatBackend, ChatMessage, ChatRequest, ModelError, ModelTurn, ToolCallRequest, Usage};

pub struct OpenAiCompatBackend {
    model: String,
    chat_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// `base_url` ends before `/chat/completions`, e.g.
    /// `https://api.openai.com/v1`.
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Network(e.to_string()))?;
        let base = base_url.trim_end_matches('/');
        Ok(Self {
            model: model.into(),
            chat_url: format!("{base}/chat/completions"),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: ChatRequest) -> Result<ModelTurn, ModelError> {
        let body = build_request_body(&self.model, &req);
        debug!(model = %self.model, messages = req.messages.len(), tools = req.tools.len(), "chat completion request");

        let mut http = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let resp = http
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ModelError::Auth);
        }
        if !status.is_success() {
            let detail: String = resp.text().await.unwrap_or_default().chars().take(200).collect();
            return Err(ModelError::Http {
                status: status.as_u16(),
                detail,
            });
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| ModelError::Protocol(e.to_string()))?;
        parse_completion(&value)
    }
}

/// Build the JSON request body for an OpenAI-compatible completion.
pub(crate) fn build_request_body(model: &str, req: &ChatRequest) -> Value {
    let messages: Vec<Value> = req.messages.iter().map(message_to_json).collect();

    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": false,
    });
    if let Some(t) = req.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(m) = req.max_tokens {
        body["max_tokens"] = json!(m);
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    body
}

fn message_to_json(msg: &ChatMessage) -> Value {
    match msg {
        ChatMessage::System { content } => json!({"role": "system", "content": content}),
        ChatMessage::User { content } => json!({"role": "user", "content": content}),
        ChatMessage::Assistant {
            content,
            tool_calls,
        } => {
            let mut m = json!({"role": "assistant", "content": content});
            if !tool_calls.is_empty() {
                // On the wire, arguments are a JSON-encoded *string*.
                let calls: Vec<Value> = tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": c.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                m["tool_calls"] = json!(calls);
            }
            m
        }
        ChatMessage::Tool {
            tool_call_id,
            content,
        } => json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "content": content,
        }),
    }
}

/// Parse a completion response body into a [`ModelTurn`].
pub(crate) fn parse_completion(value: &Value) -> Result<ModelTurn, ModelError> {
    let message = value
        .pointer("/choices/0/message")
        .ok_or_else(|| ModelError::Protocol("missing choices[0].message".to_string()))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| ModelError::Protocol("tool call without id".to_string()))?;
            let name = call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .ok_or_else(|| ModelError::Protocol("tool call without name".to_string()))?;
            let raw_args = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");
            let arguments: Value = serde_json::from_str(raw_args)
                .map_err(|e| ModelError::Protocol(format!("tool arguments for {name}: {e}")))?;
            tool_calls.push(ToolCallRequest {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            });
        }
    }

    let usage = Usage {
        input_tokens: value
            .pointer("/usage/prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        output_tokens: value
            .pointer("/usage/completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    };

    Ok(ModelTurn {
        text,
        tool_calls,
        usage,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
