// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! User-interaction handlers.
//!
//! Thin by design: translate an [`IncomingEvent`] into either a command
//! execution or an aggregator append, and own the immediate replies.
//! Everything stateful happens in the stores and services.

use std::sync::Arc;

use tracing::{info, warn};

use quill_chat::{
    parse_command, ChatPort, Command, CredsAction, IncomingEvent, McpAction,
};
use quill_config::{DataPaths, ServiceMode, SettingsStore};
use quill_git::GitDriver;
use quill_hub::{McpServerSpec, ServerRegistry, ServerScope};
use quill_store::{
    BindingStore, CredentialStore, KbBinding, KbKind, ModeStore, SecretString,
};

use crate::aggregate::Aggregator;
use crate::note::slugify;
use crate::service::GIT_TOKEN_CREDENTIAL;

const HELP_TEXT: &str = "\
Send me text, links, or forwarded posts and I will file them into your \
knowledge base.

Modes: /note (save as notes), /ask (question answering), /agent (free-form \
tasks). The mode sticks until you change it.

Knowledge base: /setkb <name | remote_url>, /kb, /unsetkb
Settings: /settings, /viewsettings [category], /setsetting NAME VALUE, \
/resetsetting NAME
Credentials: /creds set git_token <token> | show | clear
Tool servers: /mcp list | add <json> | enable <name> | disable <name> | \
remove <name>
Info: /status";

pub struct Handlers {
    pub settings: SettingsStore,
    pub bindings: BindingStore,
    pub credentials: CredentialStore,
    pub modes: ModeStore,
    pub registry: ServerRegistry,
    pub chat: Arc<dyn ChatPort>,
    pub aggregator: Arc<Aggregator>,
    pub paths: DataPaths,
}

impl Handlers {
    /// Entry point for every inbound event.
    pub async fn handle_event(&self, event: IncomingEvent) {
        match self.settings.user_allowed(event.user_id) {
            Ok(true) => {}
            Ok(false) => {
                info!(user_id = event.user_id, "event from unauthorized user");
                self.reply(&event, "✗ you are not authorized to use this bot")
                    .await;
                return;
            }
            Err(e) => {
                warn!("allow-list check failed: {e}");
                self.reply(&event, "✗ something went wrong").await;
                return;
            }
        }

        match parse_command(&event.text) {
            Some(Ok(command)) => self.execute(command, &event).await,
            Some(Err(usage)) => self.reply(&event, &format!("✗ {usage}")).await,
            None => {
                let timeout = self
                    .settings
                    .get_i64(Some(event.user_id), "MESSAGE_GROUP_TIMEOUT")
                    .unwrap_or(30);
                self.aggregator
                    .add(event, std::time::Duration::from_secs(timeout as u64))
                    .await;
            }
        }
    }

    async fn reply(&self, event: &IncomingEvent, text: &str) {
        if let Err(e) = self.chat.send_text(event.chat_id, text).await {
            warn!("reply failed: {e}");
        }
    }

    async fn execute(&self, command: Command, event: &IncomingEvent) {
        let user_id = event.user_id;
        match command {
            Command::Start => {
                self.reply(event, "👋 quill is ready. Use /setkb to bind a knowledge base, then just send me things. /help for everything else.").await;
            }
            Command::Help => self.reply(event, HELP_TEXT).await,
            Command::Status => {
                let mode = self.modes.get(user_id).unwrap_or_default();
                let binding = self.bindings.get(user_id).ok().flatten();
                let kb = match &binding {
                    Some(b) => format!("{} ({:?})", b.kb_name, b.kind),
                    None => "none — /setkb to bind one".to_string(),
                };
                self.reply(event, &format!("mode: {mode}\nknowledge base: {kb}"))
                    .await;
            }
            Command::Mode(mode) => match self.modes.set(user_id, mode) {
                Ok(()) => {
                    self.reply(event, &format!("mode switched to {mode}")).await
                }
                Err(e) => {
                    warn!("mode store: {e}");
                    self.reply(event, "✗ could not persist the mode").await;
                }
            },
            Command::Settings => {
                let cats = self.settings.categories().join(", ");
                self.reply(
                    event,
                    &format!(
                        "categories: {cats}\nuse /viewsettings [category] to inspect, \
                         /setsetting NAME VALUE to override"
                    ),
                )
                .await;
            }
            Command::ViewSettings { category } => {
                match self.settings.describe(Some(user_id), category.as_deref()) {
                    Ok(infos) if infos.is_empty() => {
                        self.reply(event, "no settings in that category").await
                    }
                    Ok(infos) => {
                        let lines: Vec<String> = infos
                            .iter()
                            .map(|i| {
                                let mut flags = String::new();
                                if i.readonly {
                                    flags.push_str(" [readonly]");
                                }
                                if i.secret {
                                    flags.push_str(" [secret]");
                                }
                                if i.overridden {
                                    flags.push_str(" [override]");
                                }
                                format!("{} = {} ({}){}", i.name, i.value, i.ty, flags)
                            })
                            .collect();
                        self.reply(event, &lines.join("\n")).await;
                    }
                    Err(e) => self.reply(event, &format!("✗ {e}")).await,
                }
            }
            Command::SetSetting { name, value } => {
                match self.settings.set_user_override(user_id, &name, &value) {
                    Ok(v) => {
                        self.reply(event, &format!("{name} = {}", v.display())).await
                    }
                    Err(e) => self.reply(event, &format!("✗ {e}")).await,
                }
            }
            Command::ResetSetting { name } => {
                match self.settings.reset_user_override(user_id, &name) {
                    Ok(true) => self.reply(event, &format!("{name} reset to default")).await,
                    Ok(false) => self.reply(event, &format!("{name} had no override")).await,
                    Err(e) => self.reply(event, &format!("✗ {e}")).await,
                }
            }
            Command::SetKb { target } => self.set_kb(event, &target).await,
            Command::Kb => {
                let text = match self.bindings.get(user_id).ok().flatten() {
                    Some(b) => format!(
                        "knowledge base: {}\npath: {}\nkind: {:?}{}",
                        b.kb_name,
                        b.kb_root_path.display(),
                        b.kind,
                        b.remote_url
                            .as_deref()
                            .map(|u| format!("\nremote: {u}"))
                            .unwrap_or_default()
                    ),
                    None => "no knowledge base bound — /setkb <name | remote_url>".to_string(),
                };
                self.reply(event, &text).await;
            }
            Command::UnsetKb => match self.bindings.unbind(user_id) {
                Ok(Some(b)) => {
                    self.reply(
                        event,
                        &format!("unbound {} (the working tree stays on disk)", b.kb_name),
                    )
                    .await
                }
                Ok(None) => self.reply(event, "nothing was bound").await,
                Err(e) => self.reply(event, &format!("✗ {e}")).await,
            },
            Command::Creds(action) => self.creds(event, action).await,
            Command::Mcp(action) => self.mcp(event, action).await,
        }
    }

    async fn set_kb(&self, event: &IncomingEvent, target: &str) {
        let user_id = event.user_id;
        let is_remote = target.contains("://") || target.ends_with(".git");
        let kb_name = if is_remote {
            let last = target
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or(target);
            slugify(last.trim_end_matches(".git"))
        } else {
            slugify(target)
        };
        let kb_root = self.paths.kb_dir(&kb_name);

        let binding = if is_remote {
            let url = target.to_string();
            let credential = self
                .credentials
                .get(user_id, GIT_TOKEN_CREDENTIAL)
                .ok()
                .flatten()
                .map(|s| quill_git::GitCredential {
                    username: "git".to_string(),
                    token: s.expose().to_string(),
                });
            let root = kb_root.clone();
            let clone_url = url.clone();
            let result = tokio::task::spawn_blocking(move || {
                if root.join(".git").exists() {
                    GitDriver::open(&root)
                } else {
                    GitDriver::clone_remote(&clone_url, &root, credential.as_ref())
                }
            })
            .await;
            match result {
                Ok(Ok(_)) => KbBinding {
                    kb_name,
                    kb_root_path: kb_root,
                    kind: KbKind::Remote,
                    remote_url: Some(url),
                },
                Ok(Err(e)) => {
                    let err = crate::error::ServiceError::from(e);
                    self.reply(event, &err.user_message()).await;
                    return;
                }
                Err(e) => {
                    warn!("clone task join: {e}");
                    self.reply(event, "✗ something went wrong").await;
                    return;
                }
            }
        } else {
            let root = kb_root.clone();
            let result = tokio::task::spawn_blocking(move || {
                if root.join(".git").exists() {
                    GitDriver::open(&root).map(|_| ())
                } else {
                    GitDriver::init(&root).map(|_| ())
                }
            })
            .await;
            match result {
                Ok(Ok(())) => KbBinding {
                    kb_name,
                    kb_root_path: kb_root,
                    kind: KbKind::Local,
                    remote_url: None,
                },
                Ok(Err(e)) => {
                    let err = crate::error::ServiceError::from(e);
                    self.reply(event, &err.user_message()).await;
                    return;
                }
                Err(e) => {
                    warn!("init task join: {e}");
                    self.reply(event, "✗ something went wrong").await;
                    return;
                }
            }
        };

        let name = binding.kb_name.clone();
        match self.bindings.bind(user_id, binding) {
            Ok(previous) => {
                let note = previous
                    .map(|p| format!(" (replaced {})", p.kb_name))
                    .unwrap_or_default();
                self.reply(event, &format!("✅ bound knowledge base {name}{note}"))
                    .await;
            }
            Err(e) => self.reply(event, &format!("✗ {e}")).await,
        }
    }

    async fn creds(&self, event: &IncomingEvent, action: CredsAction) {
        let user_id = event.user_id;
        match action {
            CredsAction::Set { name, secret } => {
                match self
                    .credentials
                    .set(user_id, &name, &SecretString::new(secret))
                {
                    Ok(()) => {
                        // The inbound message contains the secret in clear;
                        // remove it from the chat history where possible.
                        let _ = self.chat.delete(event.chat_id, event.event_id).await;
                        self.reply(event, &format!("🔒 stored credential {name}")).await;
                    }
                    Err(e) => {
                        warn!("credential store: {e}");
                        self.reply(event, "✗ could not store the credential").await;
                    }
                }
            }
            CredsAction::Show => match self.credentials.names(user_id) {
                Ok(names) if names.is_empty() => {
                    self.reply(event, "no credentials stored").await
                }
                Ok(names) => {
                    self.reply(event, &format!("stored credentials: {}", names.join(", ")))
                        .await
                }
                Err(e) => {
                    warn!("credential store: {e}");
                    self.reply(event, "✗ could not read credentials").await;
                }
            },
            CredsAction::Clear { name } => {
                match self.credentials.delete(user_id, name.as_deref()) {
                    Ok(true) => self.reply(event, "🔒 cleared").await,
                    Ok(false) => self.reply(event, "nothing to clear").await,
                    Err(e) => {
                        warn!("credential store: {e}");
                        self.reply(event, "✗ could not clear credentials").await;
                    }
                }
            }
        }
    }

    async fn mcp(&self, event: &IncomingEvent, action: McpAction) {
        let user_id = event.user_id;
        match action {
            McpAction::List => {
                let servers = self.registry.visible_to(Some(user_id));
                if servers.is_empty() {
                    self.reply(event, "no MCP servers registered").await;
                    return;
                }
                let lines: Vec<String> = servers
                    .iter()
                    .map(|s| {
                        format!(
                            "{} — {} [{}{}]",
                            s.spec.name,
                            if s.spec.description.is_empty() {
                                "(no description)"
                            } else {
                                &s.spec.description
                            },
                            if s.spec.enabled { "enabled" } else { "disabled" },
                            match s.scope {
                                ServerScope::Shared => ", shared",
                                ServerScope::User(_) => ", yours",
                            }
                        )
                    })
                    .collect();
                self.reply(event, &lines.join("\n")).await;
            }
            McpAction::Add { spec_json } => {
                let spec: McpServerSpec = match serde_json::from_str(&spec_json) {
                    Ok(s) => s,
                    Err(e) => {
                        self.reply(event, &format!("✗ bad server spec: {e}")).await;
                        return;
                    }
                };
                match self.registry.add(ServerScope::User(user_id), &spec) {
                    Ok(()) => {
                        self.reply(event, &format!("✅ registered server {}", spec.name))
                            .await
                    }
                    Err(e) => self.reply(event, &format!("✗ {e}")).await,
                }
            }
            McpAction::Enable { name } => self.toggle_server(event, &name, true).await,
            McpAction::Disable { name } => self.toggle_server(event, &name, false).await,
            McpAction::Remove { name } => {
                let removed = self
                    .registry
                    .remove(ServerScope::User(user_id), &name)
                    .unwrap_or(false)
                    || self
                        .registry
                        .remove(ServerScope::Shared, &name)
                        .unwrap_or(false);
                if removed {
                    self.reply(event, &format!("removed server {name}")).await;
                } else {
                    self.reply(event, &format!("✗ no server named {name}")).await;
                }
            }
        }
    }

    async fn toggle_server(&self, event: &IncomingEvent, name: &str, enabled: bool) {
        let user_id = event.user_id;
        // User scope wins; fall back to the shared entry.
        let result = self
            .registry
            .set_enabled(ServerScope::User(user_id), name, enabled)
            .or_else(|_| self.registry.set_enabled(ServerScope::Shared, name, enabled));
        match result {
            Ok(()) => {
                self.reply(
                    event,
                    &format!("{name} {}", if enabled { "enabled" } else { "disabled" }),
                )
                .await
            }
            Err(e) => self.reply(event, &format!("✗ {e}")).await,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
