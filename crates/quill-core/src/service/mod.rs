// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The knowledge-base service pipeline.
//!
//! All three services (note creation, question answering, agent task)
//! share one state machine:
//!
//! ```text
//! acquire KB lock → configure git → pull (ff-only) → pick working dir
//!   → rate-limit check → agent run → commit + push on mutation
//!   → release lock → final status edit
//! ```
//!
//! The specializations differ only in the invocation mode (which selects
//! the tool whitelist), the success-message template, and whether a
//! mutation-free result is acceptable.  A pull failure aborts before any
//! agent execution; the lock is released on every exit path because the
//! handle is scoped to this function.

mod modes;

pub use modes::{final_message, mode_spec, ModeSpec};

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use quill_chat::ChatPort;
use quill_config::{ServiceMode, SettingsStore};
use quill_git::{GitCredential, GitDriver, GitError};
use quill_hub::HubClient;
use quill_store::{BindingStore, CredentialStore, KbBinding, KbKind};
use quill_sync::KbSyncManager;

use crate::agent::{structure_hint, AgentDriver, AgentInvocation};
use crate::context::{ContextStore, Turn};
use crate::error::ServiceError;
use crate::group::MessageGroup;
use crate::ratelimit::RateLimiter;

/// Name under which a user's Git token is stored in the credential store.
pub const GIT_TOKEN_CREDENTIAL: &str = "git_token";

/// Everything the pipeline needs, built once at startup.
pub struct ServiceDeps {
    pub settings: SettingsStore,
    pub bindings: BindingStore,
    pub credentials: CredentialStore,
    pub sync: Arc<KbSyncManager>,
    pub chat: Arc<dyn ChatPort>,
    pub driver: Arc<dyn AgentDriver>,
    pub hub: Option<Arc<HubClient>>,
    pub contexts: Arc<ContextStore>,
    pub limiter: Arc<RateLimiter>,
}

/// The status message a service progressively rewrites.
#[derive(Clone)]
pub struct StatusHandle {
    pub chat: Arc<dyn ChatPort>,
    pub chat_id: i64,
    pub message_id: i64,
}

impl StatusHandle {
    /// Best-effort phase update; a failed edit never aborts the service.
    pub async fn update(&self, text: &str) {
        if let Err(e) = self.chat.edit_text(self.chat_id, self.message_id, text).await {
            warn!(message_id = self.message_id, "status edit failed: {e}");
        }
    }
}

/// What a completed service run reports back to the router.
#[derive(Debug, Clone)]
pub struct ServiceReport {
    pub mode: ServiceMode,
    pub answer: String,
    pub commit_id: Option<String>,
    pub files_changed: Vec<String>,
}

/// Run one grouped batch through the pipeline.  The dedup gate has
/// already passed in the router.
pub async fn run_service(
    deps: &ServiceDeps,
    mode: ServiceMode,
    group: &MessageGroup,
    status: &StatusHandle,
) -> Result<ServiceReport, ServiceError> {
    let user_id = group.user_id;
    let binding = deps
        .bindings
        .get(user_id)?
        .ok_or(ServiceError::KbUnbound)?;

    status.update("⏳ waiting for the knowledge base…").await;
    let lock_timeout =
        Duration::from_secs(deps.settings.get_i64(Some(user_id), "KB_LOCK_TIMEOUT_SECS")? as u64);
    let _lock = deps.sync.with_lock(&binding.kb_root_path, lock_timeout).await?;

    let git = open_or_init(&binding).await?;
    let credential = git_credential(deps, user_id)?;

    let remote = deps.settings.get_string(Some(user_id), "KB_GIT_REMOTE")?;
    let branch = deps.settings.get_string(Some(user_id), "KB_GIT_BRANCH")?;
    if binding.kind == KbKind::Remote {
        status.update("⬇️ syncing with the remote…").await;
        pull(&git, &binding, &remote, &branch, credential.clone()).await?;
    }

    let topics_only = deps.settings.get_bool(Some(user_id), "KB_TOPICS_ONLY")?;
    let working_dir = if topics_only {
        binding.kb_root_path.join("topics")
    } else {
        binding.kb_root_path.clone()
    };
    std::fs::create_dir_all(&working_dir)
        .map_err(|e| ServiceError::internal(format!("create working dir: {e}")))?;

    let capacity = deps.settings.get_i64(Some(user_id), "RATE_BUCKET_CAPACITY")? as u32;
    let refill = deps.settings.get_f64(Some(user_id), "RATE_REFILL_PER_MINUTE")?;
    if !deps.limiter.try_acquire(user_id, capacity, refill) {
        return Err(ServiceError::RateLimited);
    }

    status.update(&format!("🤖 {} in progress…", mode_spec(mode).label)).await;
    let agent_timeout =
        Duration::from_secs(deps.settings.get_i64(Some(user_id), "AGENT_TIMEOUT_SECS")? as u64);
    let max_iterations = deps.settings.get_i64(Some(user_id), "AGENT_MAX_ITERATIONS")? as u32;
    let context = if mode == ServiceMode::Note {
        Vec::new()
    } else {
        deps.contexts.history(user_id)
    };
    let invocation = AgentInvocation {
        mode,
        user_id,
        kb_name: binding.kb_name.clone(),
        kb_root: binding.kb_root_path.clone(),
        working_dir: working_dir.clone(),
        grouped_text: group.combined_text.clone(),
        media: group.media.clone(),
        kb_structure_hint: structure_hint(&working_dir),
        context,
        deadline: tokio::time::Instant::now() + agent_timeout,
        max_iterations,
    };
    let outcome = deps.driver.run(invocation).await?;

    // Mode contracts on the effect set: ask must not mutate at all, note
    // must produce something.
    if mode == ServiceMode::Ask && outcome.has_mutations() {
        return Err(ServiceError::WhitelistViolation);
    }
    if !mode.accepts_no_mutation() && !outcome.has_mutations() {
        return Err(ServiceError::NoteEmpty);
    }

    let mut commit_id = None;
    let files_changed = outcome.changed_paths();
    if outcome.has_mutations() {
        status.update("⬆️ committing changes…").await;
        commit_id = commit(deps, &git, group, mode, &files_changed, user_id).await?;
        if commit_id.is_some() && binding.kind == KbKind::Remote {
            let retries = deps.settings.get_i64(Some(user_id), "GIT_PUSH_RETRIES")? as u32;
            quill_git::push_with_retry(git.clone(), &remote, &branch, credential, retries)
                .await?;
        }
        reindex_best_effort(deps, &binding).await;
    }

    if mode != ServiceMode::Note {
        let cap = deps.settings.get_i64(Some(user_id), "AGENT_CONTEXT_TURNS")? as usize;
        deps.contexts.push(
            user_id,
            Turn {
                user: group.combined_text.clone(),
                assistant: outcome.answer.clone(),
            },
            cap,
        );
    }

    info!(
        user_id,
        mode = %mode,
        commit = commit_id.as_deref().unwrap_or("-"),
        files = files_changed.len(),
        "service run complete"
    );
    Ok(ServiceReport {
        mode,
        answer: outcome.answer,
        commit_id,
        files_changed,
    })
}

async fn open_or_init(binding: &KbBinding) -> Result<GitDriver, ServiceError> {
    let path = binding.kb_root_path.clone();
    tokio::task::spawn_blocking(move || match GitDriver::open(&path) {
        Ok(git) => Ok(git),
        Err(GitError::NotARepo(_)) => GitDriver::init(&path),
        Err(e) => Err(e),
    })
    .await
    .map_err(|e| ServiceError::internal(format!("git task join: {e}")))?
    .map_err(ServiceError::from)
}

fn git_credential(
    deps: &ServiceDeps,
    user_id: i64,
) -> Result<Option<GitCredential>, ServiceError> {
    let secret = deps.credentials.get(user_id, GIT_TOKEN_CREDENTIAL)?;
    Ok(secret.map(|s| GitCredential {
        username: "git".to_string(),
        token: s.expose().to_string(),
    }))
}

async fn pull(
    git: &GitDriver,
    binding: &KbBinding,
    remote: &str,
    branch: &str,
    credential: Option<GitCredential>,
) -> Result<(), ServiceError> {
    let git = git.clone();
    let remote = remote.to_string();
    let branch = branch.to_string();
    let url = binding.remote_url.clone();
    tokio::task::spawn_blocking(move || {
        if let Some(url) = url {
            git.configure_remote(&remote, &url)?;
        }
        git.pull_ff(&remote, &branch, credential.as_ref()).map(|_| ())
    })
    .await
    .map_err(|e| ServiceError::internal(format!("git task join: {e}")))?
    .map_err(ServiceError::from)
}

async fn commit(
    deps: &ServiceDeps,
    git: &GitDriver,
    group: &MessageGroup,
    mode: ServiceMode,
    paths: &[String],
    user_id: i64,
) -> Result<Option<String>, ServiceError> {
    let author = deps.settings.get_string(Some(user_id), "KB_COMMIT_AUTHOR")?;
    let email = deps.settings.get_string(Some(user_id), "KB_COMMIT_EMAIL")?;
    // The fingerprint prefix makes a replayed group detectable from the
    // history alone, even if the processed log is lost.
    let message = format!(
        "quill({mode}): {} [fp:{}]",
        group.preview(),
        &group.fingerprint[..12.min(group.fingerprint.len())]
    );
    let git = git.clone();
    let paths = paths.to_vec();
    tokio::task::spawn_blocking(move || git.commit_paths(&paths, &message, &author, &email))
        .await
        .map_err(|e| ServiceError::internal(format!("git task join: {e}")))?
        .map_err(ServiceError::from)
}

/// Refresh the hub's vector index after a mutation.  Failures only warn:
/// search staleness is preferable to failing the whole service call.
async fn reindex_best_effort(deps: &ServiceDeps, binding: &KbBinding) {
    if let Some(hub) = &deps.hub {
        let root = binding.kb_root_path.display().to_string();
        if let Err(e) = hub.reindex_vector(&binding.kb_name, &root).await {
            warn!(kb = %binding.kb_name, "vector reindex failed: {e}");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
