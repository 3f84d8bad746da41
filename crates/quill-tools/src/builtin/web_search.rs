// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use quill_config::ServiceMode;

use crate::builtin::ALL_MODES;
use crate::context::ToolContext;
use crate::tool::{require_str, Tool, ToolCall, ToolOutput};

pub struct WebSearchTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Real-time web search. count: 1-10 (default 5). ALWAYS cite sources after \
         answering:\n\
         Sources:\n\
         - [Title](URL)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "count": {"type": "integer", "description": "Number of results (default 5, max 10)"}
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        ALL_MODES
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = match require_str(call, "query") {
            Ok(q) => q,
            Err(e) => return e,
        };
        let count = call
            .args
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(5)
            .clamp(1, 10) as usize;

        debug!(query = %query, count, "web_search");

        let api_key = self
            .ctx
            .web_search_key
            .clone()
            .or_else(|| std::env::var("BRAVE_API_KEY").ok());
        let Some(api_key) = api_key else {
            return ToolOutput::err(
                &call.id,
                "no search API key configured (set WEB_SEARCH_API_KEY or BRAVE_API_KEY)",
            );
        };

        match brave_search(&query, count, &api_key, self.ctx.http_timeout).await {
            Ok(results) => ToolOutput::ok(&call.id, results),
            Err(e) => ToolOutput::err(&call.id, format!("search error: {e}")),
        }
    }
}

async fn brave_search(
    query: &str,
    count: usize,
    api_key: &str,
    timeout: std::time::Duration,
) -> Result<String, String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent("quill-agent")
        .build()
        .map_err(|e| e.to_string())?;

    let url = format!(
        "https://api.search.brave.com/res/v1/web/search?q={}&count={count}",
        urlencode(query)
    );

    let resp = client
        .get(&url)
        .header("Accept", "application/json")
        .header("X-Subscription-Token", api_key)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !resp.status().is_success() {
        return Err(format!("search API returned {}", resp.status()));
    }

    let body: Value = resp.json().await.map_err(|e| e.to_string())?;
    Ok(format_results(&body, count))
}

/// Render the provider response as a numbered list.
fn format_results(body: &Value, count: usize) -> String {
    let results = body
        .pointer("/web/results")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    if results.is_empty() {
        return "(no results)".to_string();
    }
    let mut out = Vec::new();
    for (i, r) in results.iter().enumerate().take(count) {
        let title = r.get("title").and_then(Value::as_str).unwrap_or("(untitled)");
        let url = r.get("url").and_then(Value::as_str).unwrap_or("");
        let description = r.get("description").and_then(Value::as_str).unwrap_or("");
        out.push(format!("{}. {title}\n   {url}\n   {description}", i + 1));
    }
    out.join("\n")
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
