// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Registry of external MCP tool servers.
//!
//! Specs are JSON files in two scopes: shared (`data/mcp_servers/*.json`)
//! and per-user (`data/mcp_servers/user_{id}/*.json`).  When both scopes
//! define the same `name`, the user-scope entry fully replaces the shared
//! one — tool provenance stays unambiguous.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::HubError;

/// How to reach an external tool server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: std::collections::HashMap<String, String>,
        #[serde(default)]
        working_dir: Option<PathBuf>,
    },
    Sse {
        url: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpServerSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub transport: McpTransport,
}

fn default_enabled() -> bool {
    true
}

/// Where a spec lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerScope {
    Shared,
    User(i64),
}

/// A discovered spec together with its scope.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredServer {
    pub spec: McpServerSpec,
    pub scope: ServerScope,
}

/// File-backed server registry.
#[derive(Debug, Clone)]
pub struct ServerRegistry {
    root: PathBuf,
}

impl ServerRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn scope_dir(&self, scope: ServerScope) -> PathBuf {
        match scope {
            ServerScope::Shared => self.root.clone(),
            ServerScope::User(id) => self.root.join(format!("user_{id}")),
        }
    }

    fn spec_path(&self, scope: ServerScope, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.scope_dir(scope).join(format!("{safe}.json"))
    }

    fn load_dir(&self, scope: ServerScope) -> Vec<RegisteredServer> {
        let dir = self.scope_dir(scope);
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => return out,
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Skip user_* subdirectories when scanning the shared scope.
            if !path.is_file() {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|t| serde_json::from_str::<McpServerSpec>(&t).map_err(|e| e.to_string()))
            {
                Ok(spec) => out.push(RegisteredServer { spec, scope }),
                Err(e) => warn!(path = %path.display(), "skipping unreadable server spec: {e}"),
            }
        }
        out
    }

    /// All servers visible to `user_id`: shared entries plus the user's own,
    /// with user entries replacing shared ones of the same name.
    pub fn visible_to(&self, user_id: Option<i64>) -> Vec<RegisteredServer> {
        let mut servers = self.load_dir(ServerScope::Shared);
        if let Some(uid) = user_id {
            for user_server in self.load_dir(ServerScope::User(uid)) {
                servers.retain(|s| s.spec.name != user_server.spec.name);
                servers.push(user_server);
            }
        }
        servers.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        servers
    }

    /// Enabled servers visible to `user_id`.
    pub fn enabled_for(&self, user_id: Option<i64>) -> Vec<RegisteredServer> {
        self.visible_to(user_id)
            .into_iter()
            .filter(|s| s.spec.enabled)
            .collect()
    }

    /// Add (or overwrite) a spec in the given scope.
    pub fn add(&self, scope: ServerScope, spec: &McpServerSpec) -> Result<(), HubError> {
        if spec.name.trim().is_empty() {
            return Err(HubError::Registry("server name must not be empty".into()));
        }
        let path = self.spec_path(scope, &spec.name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HubError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        let json = serde_json::to_string_pretty(spec)
            .map_err(|e| HubError::Registry(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| HubError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        info!(name = %spec.name, ?scope, "registered MCP server");
        Ok(())
    }

    /// Flip the `enabled` flag in place.  The spec must exist in the scope.
    pub fn set_enabled(
        &self,
        scope: ServerScope,
        name: &str,
        enabled: bool,
    ) -> Result<(), HubError> {
        let path = self.spec_path(scope, name);
        let text = std::fs::read_to_string(&path).map_err(|_| {
            HubError::Registry(format!("server {name} is not registered in this scope"))
        })?;
        let mut spec: McpServerSpec =
            serde_json::from_str(&text).map_err(|e| HubError::Registry(e.to_string()))?;
        spec.enabled = enabled;
        let json = serde_json::to_string_pretty(&spec)
            .map_err(|e| HubError::Registry(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| HubError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Remove a spec file.  Returns whether it existed.
    pub fn remove(&self, scope: ServerScope, name: &str) -> Result<bool, HubError> {
        let path = self.spec_path(scope, name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(HubError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
