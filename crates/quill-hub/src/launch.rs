// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Bundled-hub launcher.
//!
//! In bundled mode the bot starts the hub as a child process (the same
//! binary with the `hub` subcommand) and waits for `/health` to come up.
//! The child is killed when the handle drops, so the hub's lifetime is
//! tied to the bot's.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::HubError;

/// Handle to a bundled hub child process.
pub struct BundledHub {
    child: tokio::process::Child,
    pub base_url: String,
}

impl BundledHub {
    /// The SSE URL clients should connect to.
    pub fn sse_url(&self) -> String {
        format!("{}/sse/", self.base_url)
    }
}

impl Drop for BundledHub {
    fn drop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!("failed to stop bundled hub: {e}");
        }
    }
}

/// Spawn the current executable as `quill hub --port … --data-dir … --log-dir …`
/// and wait until its `/health` endpoint answers.
pub async fn spawn_bundled_hub(
    port: u16,
    data_dir: &Path,
    log_dir: &Path,
    startup_timeout: Duration,
) -> Result<BundledHub, HubError> {
    let exe = std::env::current_exe().map_err(|e| HubError::Unavailable(format!(
        "cannot resolve current executable: {e}"
    )))?;
    let child = tokio::process::Command::new(exe)
        .arg("hub")
        .arg("--port")
        .arg(port.to_string())
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--log-dir")
        .arg(log_dir)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| HubError::Unavailable(format!("spawn hub: {e}")))?;

    let base_url = format!("http://127.0.0.1:{port}");
    let hub = BundledHub { child, base_url };

    wait_for_health(&hub.base_url, startup_timeout).await?;
    info!(url = %hub.base_url, "bundled hub is up");
    Ok(hub)
}

/// Poll `GET /health` until it answers OK or the timeout elapses.
pub async fn wait_for_health(base_url: &str, timeout: Duration) -> Result<(), HubError> {
    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + timeout;
    let url = format!("{base_url}/health");
    loop {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ if tokio::time::Instant::now() >= deadline => {
                return Err(HubError::Unavailable(format!(
                    "hub at {base_url} did not become healthy in time"
                )))
            }
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_health_times_out_when_nothing_listens() {
        let r = wait_for_health("http://127.0.0.1:1", Duration::from_millis(300)).await;
        assert!(matches!(r, Err(HubError::Unavailable(_))));
    }

    #[tokio::test]
    async fn wait_for_health_succeeds_against_live_hub() {
        let dir = tempfile::tempdir().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base = format!("http://{addr}");
        let state = crate::HubState::new(
            crate::MemoryStore::new(dir.path().join("memory")),
            crate::VectorIndex::new(dir.path().join("memory")),
            crate::ServerRegistry::new(dir.path().join("mcp_servers")),
            base.clone(),
        );
        tokio::spawn(crate::serve(state, listener));
        wait_for_health(&base, Duration::from_secs(5)).await.unwrap();
    }
}
