// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The three service specializations.  They share the whole pipeline; what
//! varies is captured here — the label shown while running and the final
//! message template.

use quill_config::ServiceMode;

use super::ServiceReport;

#[derive(Debug, Clone, Copy)]
pub struct ModeSpec {
    pub mode: ServiceMode,
    /// Short human label used in the progress phases.
    pub label: &'static str,
}

pub fn mode_spec(mode: ServiceMode) -> ModeSpec {
    match mode {
        ServiceMode::Note => ModeSpec {
            mode,
            label: "note creation",
        },
        ServiceMode::Ask => ModeSpec {
            mode,
            label: "answering",
        },
        ServiceMode::Task => ModeSpec {
            mode,
            label: "agent task",
        },
    }
}

/// Render the final status-message text for a successful run.
pub fn final_message(report: &ServiceReport) -> String {
    match report.mode {
        ServiceMode::Note => {
            let files = report.files_changed.join("\n  ");
            let mut out = format!("✅ note saved:\n  {files}");
            if let Some(commit) = &report.commit_id {
                out.push_str(&format!("\ncommit {}", short(commit)));
            }
            if !report.answer.is_empty() {
                out.push_str(&format!("\n\n{}", report.answer));
            }
            out
        }
        ServiceMode::Ask => {
            if report.answer.is_empty() {
                "🤷 the knowledge base has nothing on that".to_string()
            } else {
                report.answer.clone()
            }
        }
        ServiceMode::Task => {
            let mut out = String::from("✅ task completed");
            if let Some(commit) = &report.commit_id {
                out.push_str(&format!(" (commit {})", short(commit)));
            }
            if !report.files_changed.is_empty() {
                out.push_str(&format!(
                    "\nchanged:\n  {}",
                    report.files_changed.join("\n  ")
                ));
            }
            if !report.answer.is_empty() {
                out.push_str(&format!("\n\n{}", report.answer));
            }
            out
        }
    }
}

fn short(commit: &str) -> &str {
    &commit[..8.min(commit.len())]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
