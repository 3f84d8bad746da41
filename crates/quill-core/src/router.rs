// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The mode router: consumes grouped batches from the aggregator,
//! enforces the dedup invariant, resolves the user's persistent mode, and
//! drives the matching service.
//!
//! Ordering: one worker task per user drains that user's groups strictly
//! in emission order; across users nothing is promised.  The dedup claim
//! happens *before* lock acquisition or any Git traffic — a duplicate
//! fingerprint is answered from here and never starts a service run.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use quill_chat::ChatPort;
use quill_store::{ModeStore, ProcessedLog};

use crate::error::ServiceError;
use crate::group::MessageGroup;
use crate::service::{final_message, run_service, ServiceDeps, StatusHandle};

pub struct Router {
    deps: Arc<ServiceDeps>,
    processed: ProcessedLog,
    modes: ModeStore,
}

impl Router {
    pub fn new(deps: Arc<ServiceDeps>, processed: ProcessedLog, modes: ModeStore) -> Self {
        Self {
            deps,
            processed,
            modes,
        }
    }

    /// Consume groups until the channel closes.  Spawns one worker per
    /// user so users never block each other while staying serialized
    /// individually.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<MessageGroup>) {
        let mut workers: HashMap<i64, mpsc::Sender<MessageGroup>> = HashMap::new();
        while let Some(group) = rx.recv().await {
            let user_id = group.user_id;
            let worker = workers.entry(user_id).or_insert_with(|| {
                let (tx, mut user_rx) = mpsc::channel::<MessageGroup>(32);
                let router = self.clone();
                tokio::spawn(async move {
                    while let Some(g) = user_rx.recv().await {
                        router.process_one(g).await;
                    }
                });
                tx
            });
            if worker.send(group).await.is_err() {
                warn!(user_id, "user worker died; dropping group");
                workers.remove(&user_id);
            }
        }
    }

    /// Handle one group end to end: dedup claim, status message, service
    /// run, final status edit.
    pub async fn process_one(&self, group: MessageGroup) {
        // Claim the fingerprint first.  Exactly one claimant proceeds,
        // within this process and across processes sharing the log.
        match self
            .processed
            .record(&group.fingerprint, group.user_id, &group.preview())
        {
            Ok(true) => {}
            Ok(false) => {
                info!(fingerprint = %group.fingerprint, "duplicate group ignored");
                let _ = self
                    .deps
                    .chat
                    .send_text(group.chat_id, "↩️ already processed, nothing to do")
                    .await;
                return;
            }
            Err(e) => {
                let err = ServiceError::from(e);
                let _ = self
                    .deps
                    .chat
                    .send_text(group.chat_id, &err.user_message())
                    .await;
                return;
            }
        }

        let message_id = match self.deps.chat.send_text(group.chat_id, "⏳ queued…").await {
            Ok(id) => id,
            Err(e) => {
                warn!("cannot create status message: {e}");
                return;
            }
        };
        let status = StatusHandle {
            chat: self.deps.chat.clone(),
            chat_id: group.chat_id,
            message_id,
        };

        let mode = self.modes.get(group.user_id).unwrap_or_default();
        info!(user_id = group.user_id, mode = %mode, fingerprint = %group.fingerprint, "dispatching group");

        match run_service(&self.deps, mode, &group, &status).await {
            Ok(report) => status.update(&final_message(&report)).await,
            Err(err) => status.update(&err.user_message()).await,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
