// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Clients for registered external tool servers.
//!
//! Stdio servers are launched as child processes speaking newline-delimited
//! JSON-RPC on stdin/stdout; SSE servers are connected through the same
//! session protocol the hub itself serves.  Connections are established on
//! demand and cached per server name.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::SseRpcClient;
use crate::registry::{McpServerSpec, McpTransport};
use crate::rpc::{RpcRequest, RpcResponse, ToolDescriptor};
use crate::HubError;

/// How long to wait for a single proxied response.
const PROXY_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC over a child process's stdio, newline-delimited.
pub struct StdioClient {
    server_name: String,
    _child: Child,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<tokio::io::Lines<BufReader<ChildStdout>>>,
    next_id: AtomicU64,
}

impl StdioClient {
    pub async fn connect(server_name: &str, spec: &McpServerSpec) -> Result<Self, HubError> {
        let McpTransport::Stdio {
            command,
            args,
            env,
            working_dir,
        } = &spec.transport
        else {
            return Err(HubError::Proxy {
                server: server_name.to_string(),
                reason: "not a stdio transport".into(),
            });
        };

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|e| HubError::Proxy {
            server: server_name.to_string(),
            reason: format!("spawn {command}: {e}"),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| HubError::Proxy {
            server: server_name.to_string(),
            reason: "child has no stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| HubError::Proxy {
            server: server_name.to_string(),
            reason: "child has no stdout".into(),
        })?;

        let client = Self {
            server_name: server_name.to_string(),
            _child: child,
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout).lines()),
            next_id: AtomicU64::new(1),
        };

        client
            .call(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "clientInfo": {"name": "quill-hub", "version": env!("CARGO_PKG_VERSION")},
                    "capabilities": {}
                }),
            )
            .await?;
        client.notify("notifications/initialized", json!({})).await?;
        info!(server = server_name, "stdio tool server initialized");
        Ok(client)
    }

    async fn send(&self, payload: &Value) -> Result<(), HubError> {
        let mut line = payload.to_string();
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.err(format!("write: {e}")))?;
        stdin.flush().await.map_err(|e| self.err(format!("flush: {e}")))
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), HubError> {
        self.send(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, HubError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = RpcRequest::new(id, method, params);
        self.send(&serde_json::to_value(&req).map_err(|e| self.err(e.to_string()))?)
            .await?;

        let response = tokio::time::timeout(PROXY_CALL_TIMEOUT, async {
            let mut lines = self.stdout.lock().await;
            loop {
                let line = lines
                    .next_line()
                    .await
                    .map_err(|e| self.err(format!("read: {e}")))?
                    .ok_or_else(|| self.err("server closed stdout".into()))?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RpcResponse>(&line) {
                    // Server-initiated requests/notifications are skipped;
                    // only the matching response resolves the call.
                    Ok(resp) if resp.id == Some(json!(id)) => return Ok(resp),
                    Ok(_) => continue,
                    Err(_) => {
                        debug!(server = %self.server_name, "skipping non-response line");
                        continue;
                    }
                }
            }
        })
        .await
        .map_err(|_| self.err("call timed out".into()))??;

        if let Some(err) = response.error {
            return Err(self.err(format!("{method}: {}", err.message)));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    fn err(&self, reason: String) -> HubError {
        HubError::Proxy {
            server: self.server_name.clone(),
            reason,
        }
    }
}

/// One live connection to an external server.
pub enum ProxyConnection {
    Stdio(StdioClient),
    Sse(SseRpcClient),
}

impl ProxyConnection {
    pub async fn connect(spec: &McpServerSpec) -> Result<Self, HubError> {
        match &spec.transport {
            McpTransport::Stdio { .. } => {
                Ok(Self::Stdio(StdioClient::connect(&spec.name, spec).await?))
            }
            McpTransport::Sse { url } => {
                let client = SseRpcClient::connect(url, Duration::from_secs(10)).await?;
                client
                    .call(
                        "initialize",
                        json!({
                            "protocolVersion": "2024-11-05",
                            "clientInfo": {"name": "quill-hub", "version": env!("CARGO_PKG_VERSION")},
                            "capabilities": {}
                        }),
                    )
                    .await?;
                Ok(Self::Sse(client))
            }
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, HubError> {
        let result = match self {
            Self::Stdio(c) => c.call("tools/list", json!({})).await?,
            Self::Sse(c) => c.call("tools/list", json!({})).await?,
        };
        let tools = result.get("tools").cloned().unwrap_or(json!([]));
        serde_json::from_value(tools).map_err(|e| HubError::Session(e.to_string()))
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, HubError> {
        let params = json!({"name": name, "arguments": arguments});
        match self {
            Self::Stdio(c) => c.call("tools/call", params).await,
            Self::Sse(c) => c.call("tools/call", params).await,
        }
    }
}

/// Cache of live proxy connections, keyed by server name.
#[derive(Default)]
pub struct ProxyPool {
    connections: Mutex<HashMap<String, Arc<ProxyConnection>>>,
}

impl ProxyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a live connection for `spec`, connecting on first use.
    pub async fn get_or_connect(
        &self,
        spec: &McpServerSpec,
    ) -> Result<Arc<ProxyConnection>, HubError> {
        let mut map = self.connections.lock().await;
        if let Some(conn) = map.get(&spec.name) {
            return Ok(conn.clone());
        }
        let conn = Arc::new(ProxyConnection::connect(spec).await?);
        map.insert(spec.name.clone(), conn.clone());
        Ok(conn)
    }

    /// Drop a cached connection (after failure or when a server is
    /// disabled/removed).
    pub async fn evict(&self, name: &str) {
        if self.connections.lock().await.remove(name).is_some() {
            warn!(server = name, "evicted proxy connection");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sse_spec(url: &str) -> McpServerSpec {
        McpServerSpec {
            name: "remote".into(),
            description: String::new(),
            enabled: true,
            transport: McpTransport::Sse {
                url: url.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn sse_connect_failure_is_reported() {
        // Nothing listens on this port.
        let spec = sse_spec("http://127.0.0.1:1/sse/");
        let r = ProxyConnection::connect(&spec).await;
        assert!(r.is_err());
    }

    #[tokio::test]
    async fn stdio_spawn_failure_is_reported() {
        let spec = McpServerSpec {
            name: "ghost".into(),
            description: String::new(),
            enabled: true,
            transport: McpTransport::Stdio {
                command: "/nonexistent/quill-test-binary".into(),
                args: vec![],
                env: Default::default(),
                working_dir: None,
            },
        };
        let r = ProxyConnection::connect(&spec).await;
        assert!(matches!(r, Err(HubError::Proxy { .. })));
    }

    #[tokio::test]
    async fn pool_eviction_is_idempotent() {
        let pool = ProxyPool::new();
        pool.evict("never-connected").await;
        pool.evict("never-connected").await;
    }
}
