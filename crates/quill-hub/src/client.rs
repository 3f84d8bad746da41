// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! SSE + JSON-RPC client for MCP-style tool servers.
//!
//! [`SseRpcClient`] speaks the generic wire protocol (session establishment
//! over `GET /sse/`, calls over `POST /messages/?session_id=…`) and is used
//! both for the hub itself and for proxied external SSE servers.
//! [`HubClient`] layers the hub's typed tool surface on top.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::rpc::{RpcRequest, RpcResponse, ToolDescriptor};
use crate::HubError;

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub name: String,
    pub data: String,
}

/// Incremental SSE frame parser.
///
/// Feed raw bytes with [`push`]; complete events come back in order.
/// Empty `data:` lines are ignored per the wire contract; comment lines
/// (leading `:`) are keep-alives and are dropped.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: String,
    event_name: String,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    events.push(SseEvent {
                        name: if self.event_name.is_empty() {
                            "message".to_string()
                        } else {
                            self.event_name.clone()
                        },
                        data: self.data_lines.join("\n"),
                    });
                }
                self.event_name.clear();
                self.data_lines.clear();
            } else if let Some(name) = line.strip_prefix("event:") {
                self.event_name = name.trim().to_string();
            } else if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    self.data_lines.push(data.to_string());
                }
            }
            // Comment lines and unknown fields are ignored.
        }
        events
    }
}

/// Generic client for an SSE-established JSON-RPC session.
pub struct SseRpcClient {
    http: reqwest::Client,
    messages_url: String,
    next_id: AtomicU64,
    /// Responses delivered over the SSE stream (for servers answering 202).
    sse_responses: Mutex<mpsc::UnboundedReceiver<RpcResponse>>,
}

impl SseRpcClient {
    /// Establish a session against `sse_url` (e.g.
    /// `http://127.0.0.1:8765/sse/`).  Fails if the `endpoint` event does
    /// not arrive within `timeout`.
    pub async fn connect(sse_url: &str, timeout: Duration) -> Result<Self, HubError> {
        let http = reqwest::Client::new();
        let resp = http
            .get(sse_url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| HubError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(HubError::Session(format!(
                "GET {sse_url} returned {}",
                resp.status()
            )));
        }

        let mut stream = resp.bytes_stream();
        let mut parser = SseParser::default();

        let endpoint = tokio::time::timeout(timeout, async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| HubError::Session(e.to_string()))?;
                let text = String::from_utf8_lossy(&chunk).to_string();
                for event in parser.push(&text) {
                    if event.name == "endpoint" {
                        return Ok::<String, HubError>(event.data);
                    }
                }
            }
            Err(HubError::Session("SSE stream closed before endpoint".into()))
        })
        .await
        .map_err(|_| HubError::Session("timed out waiting for endpoint event".into()))??;

        let uri = serde_json::from_str::<Value>(&endpoint)
            .ok()
            .and_then(|v| v.get("uri").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| HubError::Session(format!("malformed endpoint event: {endpoint}")))?;
        let messages_url = resolve_endpoint(sse_url, &uri)?;
        debug!(messages_url = %messages_url, "SSE session established");

        // Keep draining the SSE stream in the background so servers that
        // answer 202 and deliver results over SSE still work.
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut parser = parser;
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(_) => break,
                };
                let text = String::from_utf8_lossy(&chunk).to_string();
                for event in parser.push(&text) {
                    if event.name == "message" {
                        match serde_json::from_str::<RpcResponse>(&event.data) {
                            Ok(resp) => {
                                let _ = tx.send(resp);
                            }
                            Err(e) => warn!("unparseable SSE message event: {e}"),
                        }
                    }
                }
            }
        });

        Ok(Self {
            http,
            messages_url,
            next_id: AtomicU64::new(1),
            sse_responses: Mutex::new(rx),
        })
    }

    /// Issue one JSON-RPC call and return its `result`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, HubError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = RpcRequest::new(id, method, params);
        let resp = self
            .http
            .post(&self.messages_url)
            .json(&req)
            .send()
            .await
            .map_err(|e| HubError::Unavailable(e.to_string()))?;

        let status = resp.status().as_u16();
        let rpc: RpcResponse = if status == 202 {
            // Result arrives over the SSE stream.
            self.await_sse_response(id).await?
        } else if (200..300).contains(&status) {
            resp.json()
                .await
                .map_err(|e| HubError::Session(format!("malformed response body: {e}")))?
        } else {
            return Err(HubError::Unavailable(format!(
                "POST {} returned {status}",
                self.messages_url
            )));
        };

        if let Some(err) = rpc.error {
            return Err(HubError::Tool {
                name: method.to_string(),
                reason: err.message,
            });
        }
        Ok(rpc.result.unwrap_or(Value::Null))
    }

    async fn await_sse_response(&self, id: u64) -> Result<RpcResponse, HubError> {
        let mut rx = self.sse_responses.lock().await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            let resp = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .map_err(|_| HubError::Session("timed out waiting for SSE response".into()))?
                .ok_or_else(|| HubError::Session("SSE stream closed".into()))?;
            if resp.id == Some(json!(id)) {
                return Ok(resp);
            }
            // A response for a different call; with calls serialized per
            // client this is unexpected but harmless to skip.
        }
    }
}

/// Resolve a possibly-relative endpoint URI against the SSE URL's origin.
fn resolve_endpoint(sse_url: &str, uri: &str) -> Result<String, HubError> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(uri.to_string());
    }
    // Extract scheme://host[:port] from the SSE URL.
    let scheme_end = sse_url
        .find("://")
        .ok_or_else(|| HubError::Session(format!("bad SSE url: {sse_url}")))?;
    let origin_end = sse_url[scheme_end + 3..]
        .find('/')
        .map(|i| scheme_end + 3 + i)
        .unwrap_or(sse_url.len());
    let origin = &sse_url[..origin_end];
    if uri.starts_with('/') {
        Ok(format!("{origin}{uri}"))
    } else {
        Ok(format!("{origin}/{uri}"))
    }
}

/// Typed client for the hub's built-in tool surface.
pub struct HubClient {
    rpc: SseRpcClient,
    base_url: String,
}

impl HubClient {
    /// Connect to a hub at `base_url` (e.g. `http://127.0.0.1:8765`).
    pub async fn connect(base_url: &str, timeout: Duration) -> Result<Self, HubError> {
        let base = base_url.trim_end_matches('/');
        // Trailing slash is part of the wire contract.
        let sse_url = if base.ends_with("/sse") {
            format!("{base}/")
        } else {
            format!("{base}/sse/")
        };
        let rpc = SseRpcClient::connect(&sse_url, timeout).await?;
        Ok(Self {
            rpc,
            base_url: base.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, HubError> {
        let result = self.rpc.call("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| HubError::Session("tools/list result without tools".into()))?;
        serde_json::from_value(tools).map_err(|e| HubError::Session(e.to_string()))
    }

    /// Call a tool; returns the `{success, …}` result object.  A result
    /// with `success: false` becomes a [`HubError::Tool`].
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, HubError> {
        let result = self
            .rpc
            .call("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        if result.get("success").and_then(Value::as_bool) == Some(false) {
            let reason = result
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("tool reported failure")
                .to_string();
            return Err(HubError::Tool {
                name: name.to_string(),
                reason,
            });
        }
        Ok(result)
    }

    // ── Typed helpers for the built-in tools ─────────────────────────────────

    pub async fn store_memory(
        &self,
        user_id: i64,
        content: &str,
        category: Option<&str>,
    ) -> Result<String, HubError> {
        let mut args = json!({"content": content, "user_id": user_id});
        if let Some(c) = category {
            args["category"] = json!(c);
        }
        let result = self.call_tool("store_memory", args).await?;
        Ok(result
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    pub async fn retrieve_memory(
        &self,
        user_id: i64,
        query: &str,
        category: Option<&str>,
    ) -> Result<Vec<Value>, HubError> {
        let mut args = json!({"query": query, "user_id": user_id});
        if let Some(c) = category {
            args["category"] = json!(c);
        }
        let result = self.call_tool("retrieve_memory", args).await?;
        Ok(result
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn list_categories(&self, user_id: i64) -> Result<Vec<String>, HubError> {
        let result = self
            .call_tool("list_categories", json!({"user_id": user_id}))
            .await?;
        Ok(result
            .get("categories")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn vector_search(
        &self,
        kb_id: &str,
        query: &str,
        top_k: usize,
        user_id: Option<i64>,
    ) -> Result<Vec<Value>, HubError> {
        let mut args = json!({"query": query, "top_k": top_k, "kb_id": kb_id});
        if let Some(uid) = user_id {
            args["user_id"] = json!(uid);
        }
        let result = self.call_tool("vector_search", args).await?;
        Ok(result
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn reindex_vector(&self, kb_id: &str, root_path: &str) -> Result<u64, HubError> {
        let result = self
            .call_tool(
                "reindex_vector",
                json!({"kb_id": kb_id, "root_path": root_path}),
            )
            .await?;
        Ok(result.get("indexed").and_then(Value::as_u64).unwrap_or(0))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── SSE parser ────────────────────────────────────────────────────────────

    #[test]
    fn parses_named_event() {
        let mut p = SseParser::default();
        let events =
            p.push("event: endpoint\ndata: {\"uri\": \"/messages/?session_id=1\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "endpoint");
        assert!(events[0].data.contains("session_id=1"));
    }

    #[test]
    fn handles_chunked_delivery() {
        let mut p = SseParser::default();
        assert!(p.push("event: end").is_empty());
        assert!(p.push("point\ndata: {\"uri\"").is_empty());
        let events = p.push(": \"/m\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "endpoint");
    }

    #[test]
    fn empty_data_lines_are_ignored() {
        let mut p = SseParser::default();
        let events = p.push("data:\n\n");
        assert!(events.is_empty(), "empty data must not produce an event");
    }

    #[test]
    fn comment_lines_are_ignored() {
        let mut p = SseParser::default();
        let events = p.push(": keep-alive\n\ndata: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn default_event_name_is_message() {
        let mut p = SseParser::default();
        let events = p.push("data: {\"jsonrpc\":\"2.0\"}\n\n");
        assert_eq!(events[0].name, "message");
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut p = SseParser::default();
        let events = p.push("data: one\n\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two");
    }

    #[test]
    fn crlf_lines_are_handled() {
        let mut p = SseParser::default();
        let events = p.push("event: endpoint\r\ndata: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    // ── Endpoint resolution ───────────────────────────────────────────────────

    #[test]
    fn absolute_uri_passes_through() {
        let url = resolve_endpoint(
            "http://127.0.0.1:8765/sse/",
            "http://127.0.0.1:8765/messages/?session_id=a",
        )
        .unwrap();
        assert_eq!(url, "http://127.0.0.1:8765/messages/?session_id=a");
    }

    #[test]
    fn relative_uri_resolves_against_origin() {
        let url =
            resolve_endpoint("http://127.0.0.1:8765/sse/", "/messages/?session_id=a").unwrap();
        assert_eq!(url, "http://127.0.0.1:8765/messages/?session_id=a");
    }

    #[test]
    fn bad_sse_url_is_rejected() {
        assert!(resolve_endpoint("not a url", "/messages/").is_err());
    }
}
