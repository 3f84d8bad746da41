// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Slash-command parsing.
//!
//! A message starting with `/` is a command; everything else flows into
//! the aggregator.  Parse errors surface as user-visible usage strings,
//! not as silent drops.

use std::str::FromStr;

use quill_config::ServiceMode;

#[derive(Debug, Clone, PartialEq)]
pub enum CredsAction {
    /// `/creds set <name> <secret>`
    Set { name: String, secret: String },
    /// `/creds show` — names only; secrets are never echoed.
    Show,
    /// `/creds clear [name]`
    Clear { name: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum McpAction {
    List,
    /// `/mcp add <json-spec>` — the payload is the server spec document.
    Add { spec_json: String },
    Enable { name: String },
    Disable { name: String },
    Remove { name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Help,
    Status,
    Mode(ServiceMode),
    Settings,
    ViewSettings { category: Option<String> },
    SetSetting { name: String, value: String },
    ResetSetting { name: String },
    SetKb { target: String },
    Kb,
    UnsetKb,
    Creds(CredsAction),
    Mcp(McpAction),
}

/// Parse a message as a command.
///
/// Returns `None` when the text is not a command at all, `Some(Err(usage))`
/// when it is a known command with bad arguments, and `Some(Err(unknown))`
/// for an unrecognized command word.
pub fn parse_command(text: &str) -> Option<Result<Command, String>> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let word = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();
    // Strip a platform bot suffix like /help@my_bot.
    let word = word.split('@').next().unwrap_or(word);

    let cmd = match word {
        "/start" => Ok(Command::Start),
        "/help" => Ok(Command::Help),
        "/status" => Ok(Command::Status),
        "/note" | "/ask" | "/agent" => {
            // The leading slash is stripped; ServiceMode parses the word.
            Ok(Command::Mode(
                ServiceMode::from_str(&word[1..]).expect("mode words are valid"),
            ))
        }
        // `/settings KB` is a shortcut for `/viewsettings KB`.
        "/settings" if rest.is_empty() => Ok(Command::Settings),
        "/settings" | "/viewsettings" => Ok(Command::ViewSettings {
            category: (!rest.is_empty()).then(|| rest.to_string()),
        }),
        "/setsetting" => {
            let mut args = rest.splitn(2, char::is_whitespace);
            match (args.next().filter(|s| !s.is_empty()), args.next()) {
                (Some(name), Some(value)) => Ok(Command::SetSetting {
                    name: name.to_string(),
                    value: value.trim().to_string(),
                }),
                _ => Err("usage: /setsetting NAME VALUE".to_string()),
            }
        }
        "/resetsetting" => {
            if rest.is_empty() {
                Err("usage: /resetsetting NAME".to_string())
            } else {
                Ok(Command::ResetSetting {
                    name: rest.to_string(),
                })
            }
        }
        "/setkb" => {
            if rest.is_empty() {
                Err("usage: /setkb <name | remote_url>".to_string())
            } else {
                Ok(Command::SetKb {
                    target: rest.to_string(),
                })
            }
        }
        "/kb" => Ok(Command::Kb),
        "/unsetkb" => Ok(Command::UnsetKb),
        "/creds" => parse_creds(rest),
        "/mcp" => parse_mcp(rest),
        other => Err(format!("unknown command: {other} (see /help)")),
    };
    Some(cmd)
}

fn parse_creds(rest: &str) -> Result<Command, String> {
    let usage = "usage: /creds set <name> <secret> | show | clear [name]";
    let mut parts = rest.splitn(2, char::is_whitespace);
    match parts.next().unwrap_or("") {
        "set" => {
            let tail = parts.next().unwrap_or("").trim();
            let mut kv = tail.splitn(2, char::is_whitespace);
            match (kv.next().filter(|s| !s.is_empty()), kv.next()) {
                (Some(name), Some(secret)) => Ok(Command::Creds(CredsAction::Set {
                    name: name.to_string(),
                    secret: secret.trim().to_string(),
                })),
                _ => Err(usage.to_string()),
            }
        }
        "show" => Ok(Command::Creds(CredsAction::Show)),
        "clear" => Ok(Command::Creds(CredsAction::Clear {
            name: parts
                .next()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })),
        _ => Err(usage.to_string()),
    }
}

fn parse_mcp(rest: &str) -> Result<Command, String> {
    let usage = "usage: /mcp list | add <json> | enable <name> | disable <name> | remove <name>";
    let mut parts = rest.splitn(2, char::is_whitespace);
    let action = parts.next().unwrap_or("");
    let tail = parts.next().unwrap_or("").trim();
    match action {
        "list" | "" => Ok(Command::Mcp(McpAction::List)),
        "add" => {
            if tail.is_empty() {
                Err(usage.to_string())
            } else {
                Ok(Command::Mcp(McpAction::Add {
                    spec_json: tail.to_string(),
                }))
            }
        }
        "enable" | "disable" | "remove" => {
            if tail.is_empty() {
                return Err(usage.to_string());
            }
            let name = tail.to_string();
            Ok(Command::Mcp(match action {
                "enable" => McpAction::Enable { name },
                "disable" => McpAction::Disable { name },
                _ => McpAction::Remove { name },
            }))
        }
        _ => Err(usage.to_string()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(text: &str) -> Command {
        parse_command(text).unwrap().unwrap()
    }

    #[test]
    fn non_commands_return_none() {
        assert!(parse_command("hello world").is_none());
        assert!(parse_command("  plain text").is_none());
        assert!(parse_command("").is_none());
    }

    #[test]
    fn informational_commands() {
        assert_eq!(ok("/start"), Command::Start);
        assert_eq!(ok("/help"), Command::Help);
        assert_eq!(ok("/status"), Command::Status);
    }

    #[test]
    fn mode_commands() {
        assert_eq!(ok("/note"), Command::Mode(ServiceMode::Note));
        assert_eq!(ok("/ask"), Command::Mode(ServiceMode::Ask));
        assert_eq!(ok("/agent"), Command::Mode(ServiceMode::Task));
    }

    #[test]
    fn bot_suffix_is_stripped() {
        assert_eq!(ok("/help@quill_bot"), Command::Help);
    }

    #[test]
    fn viewsettings_with_and_without_category() {
        assert_eq!(
            ok("/viewsettings"),
            Command::ViewSettings { category: None }
        );
        assert_eq!(
            ok("/viewsettings KB"),
            Command::ViewSettings {
                category: Some("KB".into())
            }
        );
    }

    #[test]
    fn settings_with_category_is_a_view_shortcut() {
        assert_eq!(ok("/settings"), Command::Settings);
        assert_eq!(
            ok("/settings AGENT"),
            Command::ViewSettings {
                category: Some("AGENT".into())
            }
        );
    }

    #[test]
    fn setsetting_splits_name_and_value() {
        assert_eq!(
            ok("/setsetting MESSAGE_GROUP_TIMEOUT 60"),
            Command::SetSetting {
                name: "MESSAGE_GROUP_TIMEOUT".into(),
                value: "60".into()
            }
        );
        // Values may contain spaces.
        assert_eq!(
            ok("/setsetting AGENT_MODEL some model name"),
            Command::SetSetting {
                name: "AGENT_MODEL".into(),
                value: "some model name".into()
            }
        );
    }

    #[test]
    fn setsetting_without_value_is_usage_error() {
        let err = parse_command("/setsetting ONLY_NAME").unwrap().unwrap_err();
        assert!(err.contains("usage"));
    }

    #[test]
    fn kb_commands() {
        assert_eq!(
            ok("/setkb my-notes"),
            Command::SetKb {
                target: "my-notes".into()
            }
        );
        assert_eq!(
            ok("/setkb https://example.com/me/kb.git"),
            Command::SetKb {
                target: "https://example.com/me/kb.git".into()
            }
        );
        assert_eq!(ok("/kb"), Command::Kb);
        assert_eq!(ok("/unsetkb"), Command::UnsetKb);
        assert!(parse_command("/setkb").unwrap().is_err());
    }

    #[test]
    fn creds_commands() {
        assert_eq!(
            ok("/creds set git_token ghp_abc"),
            Command::Creds(CredsAction::Set {
                name: "git_token".into(),
                secret: "ghp_abc".into()
            })
        );
        assert_eq!(ok("/creds show"), Command::Creds(CredsAction::Show));
        assert_eq!(
            ok("/creds clear"),
            Command::Creds(CredsAction::Clear { name: None })
        );
        assert_eq!(
            ok("/creds clear git_token"),
            Command::Creds(CredsAction::Clear {
                name: Some("git_token".into())
            })
        );
        assert!(parse_command("/creds set onlyname").unwrap().is_err());
    }

    #[test]
    fn mcp_commands() {
        assert_eq!(ok("/mcp list"), Command::Mcp(McpAction::List));
        assert_eq!(ok("/mcp"), Command::Mcp(McpAction::List));
        assert_eq!(
            ok("/mcp enable search"),
            Command::Mcp(McpAction::Enable {
                name: "search".into()
            })
        );
        assert_eq!(
            ok(r#"/mcp add {"name": "s", "transport": {"kind": "sse", "url": "http://x"}}"#),
            Command::Mcp(McpAction::Add {
                spec_json: r#"{"name": "s", "transport": {"kind": "sse", "url": "http://x"}}"#
                    .into()
            })
        );
        assert!(parse_command("/mcp enable").unwrap().is_err());
    }

    #[test]
    fn unknown_command_is_an_error_not_none() {
        let err = parse_command("/frobnicate").unwrap().unwrap_err();
        assert!(err.contains("unknown command"));
    }
}
