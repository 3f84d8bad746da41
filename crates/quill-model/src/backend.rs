// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::{ChatRequest, ModelError, ModelTurn};

/// One LLM backend, abstracted to a single non-streaming turn.
///
/// The agent loop owns the conversation; a backend only maps the current
/// request to the next model turn.  Backends must be safe to share across
/// tasks.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stable backend id for logs and status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return the model's turn.
    async fn complete(&self, req: ChatRequest) -> Result<ModelTurn, ModelError>;
}
