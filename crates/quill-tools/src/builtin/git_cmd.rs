// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use quill_config::ServiceMode;

use crate::builtin::TASK_ONLY;
use crate::context::ToolContext;
use crate::tool::{require_str, Tool, ToolCall, ToolOutput};

/// Read-only subcommands the agent may run.  Anything that can mutate
/// history or the working tree goes through the service pipeline instead.
const ALLOWED_SUBCOMMANDS: &[&str] = &["status", "log", "diff", "show", "branch"];

const OUTPUT_MAX_CHARS: usize = 20_000;

pub struct GitCommandTool {
    pub ctx: Arc<ToolContext>,
}

/// Validate and split a raw command line into git arguments.
///
/// The first token must be a whitelisted subcommand; everything else is
/// passed through verbatim.
pub(crate) fn validate_command(raw: &str) -> Result<Vec<String>, String> {
    let tokens: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if tokens.is_empty() {
        return Err("empty git command".to_string());
    }
    // Accept both "log --oneline" and "git log --oneline".
    let (sub, rest) = if tokens[0] == "git" {
        match tokens.get(1) {
            Some(second) => (second.clone(), &tokens[2..]),
            None => return Err("empty git command".to_string()),
        }
    } else {
        (tokens[0].clone(), &tokens[1..])
    };
    if !ALLOWED_SUBCOMMANDS.contains(&sub.as_str()) {
        return Err(format!(
            "git subcommand not permitted: {sub} (allowed: {})",
            ALLOWED_SUBCOMMANDS.join(", ")
        ));
    }
    let mut args = vec![sub];
    args.extend(rest.iter().cloned());
    Ok(args)
}

#[async_trait]
impl Tool for GitCommandTool {
    fn name(&self) -> &str {
        "git_command"
    }

    fn description(&self) -> &str {
        "Run a read-only git subcommand (status, log, diff, show, branch) inside \
         the knowledge-base repository."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Subcommand with arguments, e.g. 'log --oneline -5'"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        TASK_ONLY
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let raw = match require_str(call, "command") {
            Ok(c) => c,
            Err(e) => return e,
        };
        let args = match validate_command(&raw) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        debug!(args = ?args, "git_command");

        let output = tokio::process::Command::new("git")
            .args(&args)
            .current_dir(&self.ctx.kb_root)
            .output()
            .await;
        match output {
            Ok(out) => {
                let mut text = String::from_utf8_lossy(&out.stdout).to_string();
                if !out.status.success() {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    return ToolOutput::err(
                        &call.id,
                        format!("git exited with {}: {stderr}", out.status),
                    );
                }
                if text.chars().count() > OUTPUT_MAX_CHARS {
                    text = text.chars().take(OUTPUT_MAX_CHARS).collect();
                    text.push_str("\n...[truncated]");
                }
                if text.trim().is_empty() {
                    text = "(no output)".to_string();
                }
                ToolOutput::ok(&call.id, text)
            }
            Err(e) => ToolOutput::err(&call.id, format!("failed to run git: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelisted_subcommands_pass() {
        for cmd in ["status", "log --oneline -5", "diff HEAD~1", "show HEAD", "branch -a"] {
            assert!(validate_command(cmd).is_ok(), "{cmd}");
        }
    }

    #[test]
    fn git_prefix_is_accepted() {
        let args = validate_command("git log --oneline").unwrap();
        assert_eq!(args, vec!["log", "--oneline"]);
    }

    #[test]
    fn mutating_subcommands_rejected() {
        for cmd in [
            "push origin main",
            "commit -m x",
            "reset --hard HEAD~1",
            "checkout -b evil",
            "rebase -i HEAD~3",
            "clean -fd",
        ] {
            let err = validate_command(cmd).unwrap_err();
            assert!(err.contains("not permitted"), "{cmd}: {err}");
        }
    }

    #[test]
    fn empty_command_rejected() {
        assert!(validate_command("").is_err());
        assert!(validate_command("git").is_err());
    }

    #[test]
    fn arguments_pass_through() {
        let args = validate_command("log --since=yesterday -- topics/").unwrap();
        assert_eq!(args[0], "log");
        assert!(args.contains(&"--since=yesterday".to_string()));
    }
}
