// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Which service handles the next grouped batch for a user.
///
/// The mode is persistent per user (changed with `/note`, `/ask`, `/agent`)
/// and selects both the service specialization and the tool set the agent
/// may use during that invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// Turn the grouped messages into a new Markdown note (mutating tools).
    #[default]
    Note,
    /// Answer a question from the knowledge base (read-only tools).
    Ask,
    /// Free-form agent task against the knowledge base (full tool set).
    Task,
}

impl ServiceMode {
    /// All modes, in display order.
    pub fn all() -> [ServiceMode; 3] {
        [ServiceMode::Note, ServiceMode::Ask, ServiceMode::Task]
    }

    /// Whether a result without any file mutation is acceptable in this mode.
    ///
    /// Note mode exists to produce a note; coming back empty-handed is a
    /// failure.  Ask never mutates and task may legitimately only read.
    pub fn accepts_no_mutation(self) -> bool {
        !matches!(self, ServiceMode::Note)
    }
}

impl std::fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceMode::Note => write!(f, "note"),
            ServiceMode::Ask => write!(f, "ask"),
            ServiceMode::Task => write!(f, "task"),
        }
    }
}

impl std::str::FromStr for ServiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "note" => Ok(ServiceMode::Note),
            "ask" => Ok(ServiceMode::Ask),
            "task" | "agent" => Ok(ServiceMode::Task),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
