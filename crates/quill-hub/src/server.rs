// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The hub's HTTP + SSE surface.
//!
//! Wire contract (fixed; clients depend on it byte-for-byte where it
//! matters):
//!
//! - `GET /sse/` — establishes a session; the first SSE event is named
//!   `endpoint` and its data is `{"uri": "/messages/?session_id=<uuid>"}`
//! - `POST /messages/?session_id=<uuid>` — JSON-RPC 2.0 calls; plain
//!   requests are answered `200` with the response body, notifications are
//!   answered `202` with no body
//! - `GET /health`, registry CRUD under `/registry/servers`, and generated
//!   client configs under `/config/client/{flavor}`

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::memory::MemoryStore;
use crate::proxy::ProxyPool;
use crate::registry::{RegisteredServer, ServerRegistry, ServerScope};
use crate::rpc::{codes, RpcRequest, RpcResponse, ToolDescriptor};
use crate::vector::{VectorDoc, VectorIndex};

/// Separator between a proxied server's name and its tool name in the
/// flattened tool list (`search:web_lookup`).
const PROXY_SEP: char = ':';

/// Shared state behind every handler.
#[derive(Clone)]
pub struct HubState {
    pub memory: MemoryStore,
    pub vector: VectorIndex,
    pub registry: ServerRegistry,
    pub proxies: Arc<ProxyPool>,
    pub base_url: String,
    sessions: Arc<Mutex<HashSet<String>>>,
}

impl HubState {
    pub fn new(
        memory: MemoryStore,
        vector: VectorIndex,
        registry: ServerRegistry,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            memory,
            vector,
            registry,
            proxies: Arc::new(ProxyPool::new()),
            base_url: base_url.into(),
            sessions: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

/// Build the hub router.
pub fn router(state: HubState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sse", get(sse_handler))
        .route("/sse/", get(sse_handler))
        .route("/messages", post(messages_handler))
        .route("/messages/", post(messages_handler))
        .route("/registry/servers", get(registry_list).post(registry_add))
        .route("/registry/servers/:name/enable", post(registry_enable))
        .route("/registry/servers/:name/disable", post(registry_disable))
        .route("/registry/servers/:name", delete(registry_remove))
        .route("/config/client/:flavor", get(config_client))
        .with_state(state)
}

/// Serve the hub on an already-bound listener until the process exits.
pub async fn serve(state: HubState, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "MCP hub listening");
    axum::serve(listener, router(state)).await
}

// ── /health ───────────────────────────────────────────────────────────────────

async fn health(State(state): State<HubState>) -> Json<Value> {
    let servers = state.registry.visible_to(None);
    let enabled = servers.iter().filter(|s| s.spec.enabled).count();
    Json(json!({
        "status": "ok",
        "builtin_tools": builtin_tools().iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
        "registry": {
            "total": servers.len(),
            "enabled": enabled,
        }
    }))
}

// ── /sse/ ─────────────────────────────────────────────────────────────────────

async fn sse_handler(
    State(state): State<HubState>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let session_id = Uuid::new_v4().to_string();
    state.sessions.lock().unwrap().insert(session_id.clone());
    debug!(session_id = %session_id, "SSE session opened");

    let endpoint = json!({
        "uri": format!("/messages/?session_id={session_id}")
    });
    let first = Event::default().event("endpoint").data(endpoint.to_string());

    // The connection stays open; keep-alive comments are emitted by axum.
    let stream = stream::once(async move { Ok(first) }).chain(stream::pending());
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── /messages/ ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: String,
}

async fn messages_handler(
    State(state): State<HubState>,
    Query(q): Query<SessionQuery>,
    body: String,
) -> axum::response::Response {
    if !state.sessions.lock().unwrap().contains(&q.session_id) {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    }

    let req: RpcRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            let resp = RpcResponse::err(None, codes::PARSE_ERROR, format!("parse error: {e}"));
            return (StatusCode::OK, Json(resp)).into_response();
        }
    };

    // Notifications carry no id and expect no body.
    if req.id.is_none() {
        debug!(method = %req.method, "notification");
        return StatusCode::ACCEPTED.into_response();
    }

    let resp = dispatch(&state, req).await;
    (StatusCode::OK, Json(resp)).into_response()
}

async fn dispatch(state: &HubState, req: RpcRequest) -> RpcResponse {
    let id = req.id.clone();
    match req.method.as_str() {
        "initialize" => RpcResponse::ok(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "quill-hub", "version": env!("CARGO_PKG_VERSION")},
                "capabilities": {"tools": {}}
            }),
        ),
        "ping" => RpcResponse::ok(id, json!({})),
        "tools/list" => {
            let user_id = req.params.get("user_id").and_then(Value::as_i64);
            RpcResponse::ok(id, json!({"tools": list_all_tools(state, user_id).await}))
        }
        "tools/call" => {
            let name = match req.params.get("name").and_then(Value::as_str) {
                Some(n) => n.to_string(),
                None => {
                    return RpcResponse::err(id, codes::INVALID_PARAMS, "missing tool name")
                }
            };
            let args = req.params.get("arguments").cloned().unwrap_or(json!({}));
            let result = call_tool(state, &name, args).await;
            RpcResponse::ok(id, result)
        }
        other => RpcResponse::err(
            id,
            codes::METHOD_NOT_FOUND,
            format!("unknown method: {other}"),
        ),
    }
}

// ── Tool surface ──────────────────────────────────────────────────────────────

/// Descriptors for the hub's built-in tools.
pub fn builtin_tools() -> Vec<ToolDescriptor> {
    fn schema(props: Value, required: &[&str]) -> Value {
        json!({"type": "object", "properties": props, "required": required})
    }
    vec![
        ToolDescriptor {
            name: "store_memory".into(),
            description: "Store a memory for a user; returns the entry id.".into(),
            input_schema: schema(
                json!({
                    "content": {"type": "string"},
                    "category": {"type": "string"},
                    "user_id": {"type": "integer"}
                }),
                &["content", "user_id"],
            ),
        },
        ToolDescriptor {
            name: "retrieve_memory".into(),
            description: "Retrieve a user's memories matching a query.".into(),
            input_schema: schema(
                json!({
                    "query": {"type": "string"},
                    "category": {"type": "string"},
                    "user_id": {"type": "integer"}
                }),
                &["query", "user_id"],
            ),
        },
        ToolDescriptor {
            name: "list_categories".into(),
            description: "List the memory categories a user has stored.".into(),
            input_schema: schema(json!({"user_id": {"type": "integer"}}), &["user_id"]),
        },
        ToolDescriptor {
            name: "vector_search".into(),
            description: "Search a knowledge base index.".into(),
            input_schema: schema(
                json!({
                    "query": {"type": "string"},
                    "top_k": {"type": "integer"},
                    "kb_id": {"type": "string"},
                    "user_id": {"type": "integer"}
                }),
                &["query", "kb_id"],
            ),
        },
        ToolDescriptor {
            name: "add_vector_documents".into(),
            description: "Add documents to a knowledge-base index.".into(),
            input_schema: schema(
                json!({"kb_id": {"type": "string"}, "documents": {"type": "array"}}),
                &["kb_id", "documents"],
            ),
        },
        ToolDescriptor {
            name: "update_vector_documents".into(),
            description: "Replace documents in a knowledge-base index by id.".into(),
            input_schema: schema(
                json!({"kb_id": {"type": "string"}, "documents": {"type": "array"}}),
                &["kb_id", "documents"],
            ),
        },
        ToolDescriptor {
            name: "delete_vector_documents".into(),
            description: "Delete documents from a knowledge-base index by id.".into(),
            input_schema: schema(
                json!({"kb_id": {"type": "string"}, "ids": {"type": "array"}}),
                &["kb_id", "ids"],
            ),
        },
        ToolDescriptor {
            name: "reindex_vector".into(),
            description: "Rebuild a knowledge-base index from its Markdown tree.".into(),
            input_schema: schema(
                json!({"kb_id": {"type": "string"}, "root_path": {"type": "string"}}),
                &["kb_id", "root_path"],
            ),
        },
    ]
}

/// Built-ins plus the tools of every enabled external server, namespaced
/// `server:tool`.  Unreachable servers are skipped — the hub degrades
/// rather than failing the whole listing.
async fn list_all_tools(state: &HubState, user_id: Option<i64>) -> Vec<ToolDescriptor> {
    let mut tools = builtin_tools();
    for server in state.registry.enabled_for(user_id) {
        match state.proxies.get_or_connect(&server.spec).await {
            Ok(conn) => match conn.list_tools().await {
                Ok(remote) => {
                    for mut t in remote {
                        t.name = format!("{}{}{}", server.spec.name, PROXY_SEP, t.name);
                        tools.push(t);
                    }
                }
                Err(e) => warn!(server = %server.spec.name, "tools/list failed: {e}"),
            },
            Err(e) => {
                warn!(server = %server.spec.name, "connect failed: {e}");
                state.proxies.evict(&server.spec.name).await;
            }
        }
    }
    tools
}

/// Execute one tool call; always returns a `{success: bool, …}` object.
async fn call_tool(state: &HubState, name: &str, args: Value) -> Value {
    match try_call_tool(state, name, args).await {
        Ok(v) => v,
        Err(reason) => json!({"success": false, "error": reason}),
    }
}

async fn try_call_tool(state: &HubState, name: &str, args: Value) -> Result<Value, String> {
    let require_user = || -> Result<i64, String> {
        args.get("user_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| "user_id is required".to_string())
    };
    let require_str = |key: &str| -> Result<String, String> {
        args.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| format!("{key} is required"))
    };

    match name {
        "store_memory" => {
            let user_id = require_user()?;
            let content = require_str("content")?;
            let category = args.get("category").and_then(Value::as_str);
            let id = state
                .memory
                .store(user_id, &content, category)
                .map_err(|e| e.to_string())?;
            Ok(json!({"success": true, "id": id}))
        }
        "retrieve_memory" => {
            let user_id = require_user()?;
            let query = require_str("query")?;
            let category = args.get("category").and_then(Value::as_str);
            let results = state
                .memory
                .retrieve(user_id, &query, category)
                .map_err(|e| e.to_string())?;
            Ok(json!({"success": true, "results": results}))
        }
        "list_categories" => {
            let user_id = require_user()?;
            let categories = state
                .memory
                .list_categories(user_id)
                .map_err(|e| e.to_string())?;
            Ok(json!({"success": true, "categories": categories}))
        }
        "vector_search" => {
            let kb_id = require_str("kb_id")?;
            let query = require_str("query")?;
            let top_k = args.get("top_k").and_then(Value::as_u64).unwrap_or(5) as usize;
            let results = state
                .vector
                .search(&kb_id, &query, top_k)
                .map_err(|e| e.to_string())?;
            Ok(json!({"success": true, "results": results}))
        }
        "add_vector_documents" => {
            let kb_id = require_str("kb_id")?;
            let docs: Vec<VectorDoc> =
                serde_json::from_value(args.get("documents").cloned().unwrap_or(json!([])))
                    .map_err(|e| format!("documents: {e}"))?;
            let added = state
                .vector
                .add_documents(&kb_id, docs)
                .map_err(|e| e.to_string())?;
            Ok(json!({"success": true, "added": added}))
        }
        "update_vector_documents" => {
            let kb_id = require_str("kb_id")?;
            let docs: Vec<VectorDoc> =
                serde_json::from_value(args.get("documents").cloned().unwrap_or(json!([])))
                    .map_err(|e| format!("documents: {e}"))?;
            let updated = state
                .vector
                .update_documents(&kb_id, docs)
                .map_err(|e| e.to_string())?;
            Ok(json!({"success": true, "updated": updated}))
        }
        "delete_vector_documents" => {
            let kb_id = require_str("kb_id")?;
            let ids: Vec<String> =
                serde_json::from_value(args.get("ids").cloned().unwrap_or(json!([])))
                    .map_err(|e| format!("ids: {e}"))?;
            let deleted = state
                .vector
                .delete_documents(&kb_id, &ids)
                .map_err(|e| e.to_string())?;
            Ok(json!({"success": true, "deleted": deleted}))
        }
        "reindex_vector" => {
            let kb_id = require_str("kb_id")?;
            let root = require_str("root_path")?;
            let indexed = state
                .vector
                .reindex(&kb_id, std::path::Path::new(&root))
                .map_err(|e| e.to_string())?;
            Ok(json!({"success": true, "indexed": indexed}))
        }
        proxied if proxied.contains(PROXY_SEP) => {
            let (server_name, tool_name) = proxied.split_once(PROXY_SEP).unwrap();
            let user_id = args.get("user_id").and_then(Value::as_i64);
            let server = state
                .registry
                .enabled_for(user_id)
                .into_iter()
                .find(|s| s.spec.name == server_name)
                .ok_or_else(|| format!("no enabled server named {server_name}"))?;
            let conn = state
                .proxies
                .get_or_connect(&server.spec)
                .await
                .map_err(|e| e.to_string())?;
            let result = match conn.call_tool(tool_name, args.clone()).await {
                Ok(r) => r,
                Err(e) => {
                    // A dead child or broken pipe must not poison the cache.
                    state.proxies.evict(server_name).await;
                    return Err(e.to_string());
                }
            };
            // Normalize: proxied servers may not use the success envelope.
            if result.get("success").is_some() {
                Ok(result)
            } else {
                Ok(json!({"success": true, "result": result}))
            }
        }
        other => Err(format!("unknown tool: {other}")),
    }
}

// ── Registry endpoints ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ScopeQuery {
    user_id: Option<i64>,
}

fn scope_of(q: &ScopeQuery) -> ServerScope {
    match q.user_id {
        Some(uid) => ServerScope::User(uid),
        None => ServerScope::Shared,
    }
}

fn server_json(s: &RegisteredServer) -> Value {
    json!({
        "name": s.spec.name,
        "description": s.spec.description,
        "enabled": s.spec.enabled,
        "transport": s.spec.transport,
        "scope": match s.scope {
            ServerScope::Shared => "shared".to_string(),
            ServerScope::User(id) => format!("user_{id}"),
        }
    })
}

async fn registry_list(
    State(state): State<HubState>,
    Query(q): Query<ScopeQuery>,
) -> Json<Value> {
    let servers = state.registry.visible_to(q.user_id);
    Json(json!({"servers": servers.iter().map(server_json).collect::<Vec<_>>()}))
}

async fn registry_add(
    State(state): State<HubState>,
    Query(q): Query<ScopeQuery>,
    Json(spec): Json<crate::registry::McpServerSpec>,
) -> axum::response::Response {
    match state.registry.add(scope_of(&q), &spec) {
        Ok(()) => (StatusCode::CREATED, Json(json!({"success": true}))).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn registry_enable(
    State(state): State<HubState>,
    AxumPath(name): AxumPath<String>,
    Query(q): Query<ScopeQuery>,
) -> axum::response::Response {
    set_enabled_response(&state, &name, &q, true).await
}

async fn registry_disable(
    State(state): State<HubState>,
    AxumPath(name): AxumPath<String>,
    Query(q): Query<ScopeQuery>,
) -> axum::response::Response {
    set_enabled_response(&state, &name, &q, false).await
}

async fn set_enabled_response(
    state: &HubState,
    name: &str,
    q: &ScopeQuery,
    enabled: bool,
) -> axum::response::Response {
    if !enabled {
        state.proxies.evict(name).await;
    }
    match state.registry.set_enabled(scope_of(q), name, enabled) {
        Ok(()) => Json(json!({"success": true})).into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn registry_remove(
    State(state): State<HubState>,
    AxumPath(name): AxumPath<String>,
    Query(q): Query<ScopeQuery>,
) -> axum::response::Response {
    state.proxies.evict(&name).await;
    match state.registry.remove(scope_of(&q), &name) {
        Ok(true) => Json(json!({"success": true})).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": "not registered"})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

// ── Client config endpoint ────────────────────────────────────────────────────

async fn config_client(
    State(state): State<HubState>,
    AxumPath(flavor): AxumPath<String>,
) -> axum::response::Response {
    match crate::config_gen::client_config(&flavor, &state.base_url) {
        Some(cfg) => Json(cfg).into_response(),
        None => (StatusCode::NOT_FOUND, "unknown config flavor").into_response(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
