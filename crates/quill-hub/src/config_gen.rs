// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Client-side MCP configuration fragments.
//!
//! The hub is the sole writer of these artifacts: when running bundled it
//! writes one file per flavor at startup, and serves the same fragments at
//! `GET /config/client/{flavor}`.  The subprocess agent driver points its
//! CLI at the `standard` flavor.  An externally-deployed hub still serves
//! the endpoint; the bot never generates configs itself.

use std::path::Path;

use serde_json::{json, Value};
use tracing::info;

use crate::HubError;

pub const FLAVORS: &[&str] = &["standard", "lmstudio", "openai"];

/// Produce the config fragment for one client flavor.  Returns `None` for
/// an unknown flavor.
pub fn client_config(flavor: &str, base_url: &str) -> Option<Value> {
    let base = base_url.trim_end_matches('/');
    let sse_url = format!("{base}/sse/");
    match flavor {
        "standard" => Some(json!({
            "mcpServers": {
                "quill-hub": { "url": sse_url }
            }
        })),
        "lmstudio" => Some(json!({
            "mcpServers": {
                "quill-hub": {
                    "transport": "sse",
                    "url": sse_url
                }
            }
        })),
        "openai" => Some(json!({
            "tools": [{
                "type": "mcp",
                "server_label": "quill-hub",
                "server_url": sse_url
            }]
        })),
        _ => None,
    }
}

/// Write every flavor under `<dir>/client_configs/<flavor>.json`.
pub fn write_client_configs(dir: &Path, base_url: &str) -> Result<(), HubError> {
    let target = dir.join("client_configs");
    std::fs::create_dir_all(&target).map_err(|e| HubError::Io {
        path: target.display().to_string(),
        reason: e.to_string(),
    })?;
    for flavor in FLAVORS {
        let Some(config) = client_config(flavor, base_url) else {
            continue;
        };
        let path = target.join(format!("{flavor}.json"));
        let text = serde_json::to_string_pretty(&config).map_err(|e| HubError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(&path, text).map_err(|e| HubError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    }
    info!(dir = %target.display(), "wrote client config fragments");
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
