// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Git driver for knowledge-base working trees.
//!
//! A thin, deliberately conservative wrapper over `git2`:
//!
//! - pull is fast-forward only — divergent branches surface as
//!   [`GitError::MergeRequired`] and are never auto-merged
//! - commit stages exactly the paths it is given and is a no-op when the
//!   staged tree equals `HEAD`
//! - push distinguishes authentication failures from transient network
//!   failures so callers can decide what to retry
//! - credential material is supplied per call and only ever lives in the
//!   in-memory remote callbacks
//!
//! `git2` is synchronous; async callers run driver methods through
//! [`tokio::task::spawn_blocking`] (see [`push_with_retry`]).

mod driver;
mod error;

pub use driver::{ChangeKind, GitCredential, GitDriver, PullOutcome, StatusEntry};
pub use error::GitError;

use std::time::Duration;

use tracing::warn;

/// Push with bounded exponential backoff on transient network failures.
///
/// Auth failures and any other error kind abort immediately — retrying a
/// rejected credential only invites rate limiting.
pub async fn push_with_retry(
    driver: GitDriver,
    remote: &str,
    branch: &str,
    credential: Option<GitCredential>,
    retries: u32,
) -> Result<(), GitError> {
    let mut delay = Duration::from_secs(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let d = driver.clone();
        let (r, b, c) = (remote.to_string(), branch.to_string(), credential.clone());
        let result = tokio::task::spawn_blocking(move || d.push(&r, &b, c.as_ref()))
            .await
            .map_err(|e| GitError::Internal(format!("push task join: {e}")))?;
        match result {
            Ok(()) => return Ok(()),
            Err(GitError::Network(reason)) if attempt <= retries => {
                warn!(attempt, reason = %reason, "transient push failure; backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}
