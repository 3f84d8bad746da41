// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Console transport for development: stdin lines become events from a
//! single synthetic user, outbound messages print to stdout.  This is the
//! reference [`ChatPort`] implementation; production deployments plug in a
//! real messenger transport behind the same trait.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::event::IncomingEvent;
use crate::port::{ChatError, ChatPort};

pub const CONSOLE_CHAT_ID: i64 = 1;
pub const CONSOLE_USER_ID: i64 = 1;

#[derive(Default)]
pub struct ConsolePort {
    next_id: AtomicI64,
}

impl ConsolePort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read stdin until EOF, emitting one event per non-empty line.
    pub async fn run_input_loop(tx: mpsc::Sender<IncomingEvent>) {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        let mut event_id = 0i64;
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            event_id += 1;
            let event =
                IncomingEvent::text(event_id, CONSOLE_CHAT_ID, CONSOLE_USER_ID, line.trim());
            if tx.send(event).await.is_err() {
                break;
            }
        }
        debug!("console input loop finished");
    }
}

#[async_trait]
impl ChatPort for ConsolePort {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, ChatError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        println!("[chat {chat_id} #{id}] {text}");
        Ok(id)
    }

    async fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), ChatError> {
        println!("[chat {chat_id} #{message_id} edited] {text}");
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<i64, ChatError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        println!(
            "[chat {chat_id} #{id} document] {} {}",
            path.display(),
            caption.unwrap_or_default()
        );
        Ok(id)
    }

    async fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError> {
        println!("[chat {chat_id} #{message_id} deleted]");
        Ok(())
    }
}
