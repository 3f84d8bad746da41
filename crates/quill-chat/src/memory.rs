// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::port::{ChatError, ChatPort};

/// What a test port remembers about one outbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    pub deleted: bool,
}

/// In-memory [`ChatPort`] for tests and the integration suite.  Records
/// every send/edit/delete; message ids are sequential.
#[derive(Default)]
pub struct InMemoryChatPort {
    next_id: AtomicI64,
    messages: Mutex<Vec<SentMessage>>,
}

impl InMemoryChatPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages ever sent (including later-edited content).
    pub fn messages(&self) -> Vec<SentMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// The current text of a message, if it exists.
    pub fn text_of(&self, message_id: i64) -> Option<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.message_id == message_id && !m.deleted)
            .map(|m| m.text.clone())
    }

    /// The most recent non-deleted message in a chat.
    pub fn last_in_chat(&self, chat_id: i64) -> Option<SentMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.chat_id == chat_id && !m.deleted)
            .cloned()
    }
}

#[async_trait]
impl ChatPort for InMemoryChatPort {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, ChatError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.messages.lock().unwrap().push(SentMessage {
            chat_id,
            message_id: id,
            text: text.to_string(),
            deleted: false,
        });
        Ok(id)
    }

    async fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), ChatError> {
        let mut messages = self.messages.lock().unwrap();
        match messages
            .iter_mut()
            .find(|m| m.chat_id == chat_id && m.message_id == message_id && !m.deleted)
        {
            Some(m) => {
                m.text = text.to_string();
                Ok(())
            }
            None => Err(ChatError::NotFound(message_id)),
        }
    }

    async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<i64, ChatError> {
        let text = format!(
            "[document {}] {}",
            path.display(),
            caption.unwrap_or_default()
        );
        self.send_text(chat_id, &text).await
    }

    async fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError> {
        let mut messages = self.messages.lock().unwrap();
        match messages
            .iter_mut()
            .find(|m| m.chat_id == chat_id && m.message_id == message_id && !m.deleted)
        {
            Some(m) => {
                m.deleted = true;
                Ok(())
            }
            None => Err(ChatError::NotFound(message_id)),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_assigns_sequential_ids() {
        let port = InMemoryChatPort::new();
        let a = port.send_text(1, "first").await.unwrap();
        let b = port.send_text(1, "second").await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn edit_replaces_text() {
        let port = InMemoryChatPort::new();
        let id = port.send_text(1, "queued").await.unwrap();
        port.edit_text(1, id, "done").await.unwrap();
        assert_eq!(port.text_of(id).as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn edit_missing_message_errors() {
        let port = InMemoryChatPort::new();
        assert!(port.edit_text(1, 999, "x").await.is_err());
    }

    #[tokio::test]
    async fn delete_hides_message() {
        let port = InMemoryChatPort::new();
        let id = port.send_text(1, "temp").await.unwrap();
        port.delete(1, id).await.unwrap();
        assert!(port.text_of(id).is_none());
        // Double delete fails.
        assert!(port.delete(1, id).await.is_err());
    }

    #[tokio::test]
    async fn last_in_chat_tracks_by_chat() {
        let port = InMemoryChatPort::new();
        port.send_text(1, "chat1").await.unwrap();
        port.send_text(2, "chat2").await.unwrap();
        assert_eq!(port.last_in_chat(1).unwrap().text, "chat1");
        assert_eq!(port.last_in_chat(2).unwrap().text, "chat2");
    }
}
