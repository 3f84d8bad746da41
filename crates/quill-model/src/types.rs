// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { content: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User { content: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            tool_call_id: id.into(),
            content: content.into(),
        }
    }
}

/// Tool definition forwarded to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    /// Opaque identifier assigned by the model; echoed back on the result.
    pub id: String,
    pub name: String,
    /// Parsed arguments object.
    pub arguments: serde_json::Value,
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// One request to a backend.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// One model turn: text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

impl ModelTurn {
    /// Convenience constructor for a plain text turn.
    pub fn text(t: impl Into<String>) -> Self {
        Self {
            text: Some(t.into()),
            ..Self::default()
        }
    }

    /// Convenience constructor for a single tool call.
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool_calls: vec![ToolCallRequest {
                id: id.into(),
                name: name.into(),
                arguments: args,
            }],
            ..Self::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_roles() {
        assert!(matches!(ChatMessage::system("s"), ChatMessage::System { .. }));
        assert!(matches!(ChatMessage::user("u"), ChatMessage::User { .. }));
        assert!(matches!(
            ChatMessage::assistant("a"),
            ChatMessage::Assistant { .. }
        ));
        assert!(matches!(
            ChatMessage::tool_result("id", "r"),
            ChatMessage::Tool { .. }
        ));
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total += Usage {
            input_tokens: 10,
            output_tokens: 5,
        };
        total += Usage {
            input_tokens: 3,
            output_tokens: 2,
        };
        assert_eq!(total.input_tokens, 13);
        assert_eq!(total.output_tokens, 7);
    }

    #[test]
    fn text_turn_has_no_tool_calls() {
        let t = ModelTurn::text("hi");
        assert!(!t.has_tool_calls());
        assert_eq!(t.text.as_deref(), Some("hi"));
    }

    #[test]
    fn tool_call_turn_reports_calls() {
        let t = ModelTurn::tool_call("c1", "kb_read", serde_json::json!({"path": "a.md"}));
        assert!(t.has_tool_calls());
        assert_eq!(t.tool_calls[0].name, "kb_read");
    }

    #[test]
    fn message_serde_round_trips() {
        let msgs = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("usr"),
            ChatMessage::Assistant {
                content: None,
                tool_calls: vec![ToolCallRequest {
                    id: "1".into(),
                    name: "t".into(),
                    arguments: serde_json::json!({}),
                }],
            },
            ChatMessage::tool_result("1", "out"),
        ];
        let json = serde_json::to_string(&msgs).unwrap();
        let back: Vec<ChatMessage> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msgs);
    }
}
