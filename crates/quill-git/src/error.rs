// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use git2::{ErrorClass, ErrorCode};

/// Structured Git failures.  User-visible messages are derived from the
/// variant, never from the raw libgit2 text (which may embed URLs with
/// userinfo).
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git authentication failed")]
    Auth,
    #[error("git network failure: {0}")]
    Network(String),
    #[error("local and remote branches have diverged; manual merge required")]
    MergeRequired,
    #[error("not a git repository: {0}")]
    NotARepo(String),
    #[error("remote {0} is not configured")]
    NoRemote(String),
    #[error("git operation failed: {0}")]
    Internal(String),
}

impl GitError {
    /// Classify a raw libgit2 error into the driver's taxonomy.
    pub(crate) fn classify(e: git2::Error) -> GitError {
        let msg = e.message().to_string();
        if e.code() == ErrorCode::Auth || msg.to_ascii_lowercase().contains("authentication") {
            return GitError::Auth;
        }
        match e.class() {
            ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh => GitError::Network(msg),
            _ => GitError::Internal(msg),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
