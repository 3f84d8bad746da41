// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat transport failure: {0}")]
    Transport(String),
    #[error("message {0} not found")]
    NotFound(i64),
}

/// Minimal outbound surface of a chat transport.
///
/// Services use this to create and progressively rewrite status messages;
/// handlers use it for command replies.  Implementations must be safe to
/// share across tasks.
#[async_trait]
pub trait ChatPort: Send + Sync {
    /// Send a text message; returns the new message id.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, ChatError>;

    /// Replace the text of an existing message.
    async fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), ChatError>;

    /// Send a file from disk; returns the new message id.
    async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<i64, ChatError>;

    /// Delete a message.
    async fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError>;
}
