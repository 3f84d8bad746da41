// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use quill_git::GitError;
use quill_sync::SyncError;

use crate::agent::AgentError;

/// Service-level error taxonomy.  Every variant maps to exactly one
/// user-visible rendering in [`ServiceError::user_message`]; secrets and
/// raw library messages never reach that surface.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("input rejected: {0}")]
    InputRejected(String),
    #[error("user {0} is not authorized")]
    Unauthorized(i64),
    #[error("no knowledge base is bound")]
    KbUnbound,
    #[error("knowledge base is busy")]
    KbBusy,
    #[error("git conflict: manual merge required")]
    GitConflict,
    #[error("git authentication failed")]
    GitAuthFailed,
    #[error("git network failure")]
    GitNetwork,
    #[error("agent timed out")]
    AgentTimeout,
    #[error("agent exhausted its tool budget")]
    AgentBudgetExceeded,
    #[error("agent failed: {0}")]
    AgentFailed(String),
    #[error("agent produced no note")]
    NoteEmpty,
    #[error("agent attempted mutations outside its whitelist")]
    WhitelistViolation,
    #[error("rate limited")]
    RateLimited,
    #[error("internal error [{trace_id}]")]
    Internal { trace_id: String, detail: String },
}

impl ServiceError {
    /// Wrap an unexpected failure with a trace id for log correlation.
    pub fn internal(detail: impl Into<String>) -> Self {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let detail = detail.into();
        tracing::error!(trace_id = %trace_id, detail = %detail, "internal service error");
        ServiceError::Internal { trace_id, detail }
    }

    /// The text shown to the user.  Deliberately terse and free of any
    /// internal detail.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::InputRejected(reason) => format!("✗ {reason}"),
            ServiceError::Unauthorized(_) => "✗ you are not authorized to use this bot".into(),
            ServiceError::KbUnbound => {
                "✗ no knowledge base bound — use /setkb <name | remote_url> first".into()
            }
            ServiceError::KbBusy => {
                "✗ your knowledge base is busy with another operation; try again shortly".into()
            }
            ServiceError::GitConflict => {
                "✗ the knowledge base has diverged from its remote; resolve the merge manually"
                    .into()
            }
            ServiceError::GitAuthFailed => {
                "✗ git authentication failed — check /creds set git_token …".into()
            }
            ServiceError::GitNetwork => {
                "✗ could not reach the git remote; changes are kept locally".into()
            }
            ServiceError::AgentTimeout => "✗ the agent timed out; try a smaller request".into(),
            ServiceError::AgentBudgetExceeded => {
                "✗ the agent ran out of steps; try simplifying the request".into()
            }
            ServiceError::AgentFailed(_) => "✗ the agent failed to process this request".into(),
            ServiceError::NoteEmpty => {
                "✗ no note was produced — nothing was saved; try rephrasing".into()
            }
            ServiceError::WhitelistViolation => {
                "✗ the request was rejected: this mode cannot modify the knowledge base".into()
            }
            ServiceError::RateLimited => "⏳ slow down a little and try again".into(),
            ServiceError::Internal { trace_id, .. } => {
                format!("✗ something went wrong (ref {trace_id})")
            }
        }
    }
}

impl From<SyncError> for ServiceError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Busy { .. } => ServiceError::KbBusy,
            SyncError::Io { path, reason } => {
                ServiceError::internal(format!("lock i/o at {path}: {reason}"))
            }
        }
    }
}

impl From<GitError> for ServiceError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::MergeRequired => ServiceError::GitConflict,
            GitError::Auth => ServiceError::GitAuthFailed,
            GitError::Network(_) => ServiceError::GitNetwork,
            other => ServiceError::internal(other.to_string()),
        }
    }
}

impl From<AgentError> for ServiceError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::Timeout => ServiceError::AgentTimeout,
            AgentError::BudgetExceeded => ServiceError::AgentBudgetExceeded,
            AgentError::ToolLoop(detail) => ServiceError::AgentFailed(detail),
            AgentError::Backend(e) => ServiceError::AgentFailed(e.to_string()),
            AgentError::Io(detail) => ServiceError::internal(detail),
        }
    }
}

impl From<quill_store::StoreError> for ServiceError {
    fn from(e: quill_store::StoreError) -> Self {
        ServiceError::internal(e.to_string())
    }
}

impl From<quill_config::SettingsError> for ServiceError {
    fn from(e: quill_config::SettingsError) -> Self {
        ServiceError::internal(e.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_sync_error_maps_to_kb_busy() {
        let e: ServiceError = SyncError::Busy {
            path: "/kb".into(),
            waited_secs: 300,
        }
        .into();
        assert!(matches!(e, ServiceError::KbBusy));
    }

    #[test]
    fn git_errors_map_to_taxonomy() {
        assert!(matches!(
            ServiceError::from(GitError::MergeRequired),
            ServiceError::GitConflict
        ));
        assert!(matches!(
            ServiceError::from(GitError::Auth),
            ServiceError::GitAuthFailed
        ));
        assert!(matches!(
            ServiceError::from(GitError::Network("reset".into())),
            ServiceError::GitNetwork
        ));
    }

    #[test]
    fn agent_errors_map_to_taxonomy() {
        assert!(matches!(
            ServiceError::from(AgentError::Timeout),
            ServiceError::AgentTimeout
        ));
        assert!(matches!(
            ServiceError::from(AgentError::BudgetExceeded),
            ServiceError::AgentBudgetExceeded
        ));
    }

    #[test]
    fn user_messages_never_leak_detail() {
        let e = ServiceError::internal("secret /path/with/token ghp_abc");
        let msg = e.user_message();
        assert!(!msg.contains("ghp_abc"));
        assert!(!msg.contains("/path/with"));
        assert!(msg.contains("ref "));
    }

    #[test]
    fn every_variant_has_a_user_message() {
        let variants = [
            ServiceError::InputRejected("bad".into()),
            ServiceError::Unauthorized(5),
            ServiceError::KbUnbound,
            ServiceError::KbBusy,
            ServiceError::GitConflict,
            ServiceError::GitAuthFailed,
            ServiceError::GitNetwork,
            ServiceError::AgentTimeout,
            ServiceError::AgentBudgetExceeded,
            ServiceError::AgentFailed("x".into()),
            ServiceError::NoteEmpty,
            ServiceError::WhitelistViolation,
            ServiceError::RateLimited,
        ];
        for v in variants {
            assert!(!v.user_message().is_empty());
        }
    }
}
