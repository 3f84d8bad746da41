// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! File-backed stores for the service's small persistent state: the
//! processed-event dedup log, per-user Git credentials (encrypted at rest),
//! user→KB bindings, and the persistent per-user mode.
//!
//! Every store is a single JSON document guarded by an advisory file lock on
//! a sibling `.lock` file, so multiple bot processes sharing a data
//! directory serialize their read-modify-write cycles.

mod jsonfile;

pub mod bindings;
pub mod credentials;
pub mod modes;
pub mod processed;

pub use bindings::{BindingStore, KbBinding, KbKind};
pub use credentials::{CredentialStore, SecretString};
pub use modes::ModeStore;
pub use processed::{ProcessedEntry, ProcessedLog};

/// Errors from the persistent stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store i/o error at {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("store file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("credential key error: {0}")]
    Key(String),
    #[error("decryption failed for credential {name}")]
    Decrypt { name: String },
}
