// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The MCP hub: a long-running tool server the agent consumes over
//! HTTP + Server-Sent Events.
//!
//! The hub owns per-user memory stores and per-KB vector indexes, and
//! proxies registered external tool servers (stdio or SSE).  The wire
//! protocol is fixed:
//!
//! - `GET /sse/` — the first SSE event is named `endpoint` and carries
//!   `{"uri": ".../messages/?session_id=<id>"}`
//! - all subsequent calls are JSON-RPC 2.0 `POST /messages/?session_id=<id>`
//! - tool-call arguments are JSON objects; results are `{success: bool, …}`
//!
//! Deployment is either *bundled* (the bot launches the hub as a child
//! process and discovers `http://127.0.0.1:PORT/sse/`) or *external* (URL
//! from the environment; the bot is a pure client).  In both modes the hub
//! — never the bot — writes its own client-config artifacts.

pub mod client;
pub mod config_gen;
pub mod launch;
pub mod memory;
pub mod proxy;
pub mod registry;
pub mod rpc;
pub mod server;
pub mod vector;

pub use client::{HubClient, SseRpcClient};
pub use launch::{spawn_bundled_hub, BundledHub};
pub use memory::{MemoryEntry, MemoryStore};
pub use registry::{McpServerSpec, McpTransport, ServerRegistry, ServerScope};
pub use server::{serve, HubState};
pub use vector::{VectorDoc, VectorHit, VectorIndex};

/// Errors from the hub and its clients.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub i/o error at {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("hub is unavailable: {0}")]
    Unavailable(String),
    #[error("SSE session establishment failed: {0}")]
    Session(String),
    #[error("tool {name} failed: {reason}")]
    Tool { name: String, reason: String },
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("registry error: {0}")]
    Registry(String),
    #[error("proxy error for server {server}: {reason}")]
    Proxy { server: String, reason: String },
}
