// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Model backends for the in-process agent driver.
//!
//! A [`ChatBackend`] turns a conversation plus tool schemas into one model
//! turn: either assistant text, or a batch of tool calls, or both.  The
//! OpenAI-compatible implementation covers every provider speaking the
//! standard `/chat/completions` wire format; the scripted mock drives the
//! agent loop in tests without network access.

mod backend;
mod mock;
mod openai;
mod types;

pub use backend::ChatBackend;
pub use mock::ScriptedBackend;
pub use openai::OpenAiCompatBackend;
pub use types::{ChatMessage, ChatRequest, ModelTurn, ToolCallRequest, ToolSpec, Usage};

/// Errors from a model backend.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model API authentication failed")]
    Auth,
    #[error("model API network failure: {0}")]
    Network(String),
    #[error("model API returned HTTP {status}: {detail}")]
    Http { status: u16, detail: String },
    #[error("malformed model response: {0}")]
    Protocol(String),
}
