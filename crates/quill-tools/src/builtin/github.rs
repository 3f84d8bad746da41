// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use quill_config::ServiceMode;

use crate::builtin::TASK_ONLY;
use crate::context::ToolContext;
use crate::tool::{require_str, Tool, ToolCall, ToolOutput};

const API_BASE: &str = "https://api.github.com";
const BODY_MAX_CHARS: usize = 10_000;

pub struct GithubApiTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for GithubApiTool {
    fn name(&self) -> &str {
        "github_api"
    }

    fn description(&self) -> &str {
        "Call the GitHub REST API with the configured token. path is the API path \
         (e.g. '/repos/owner/repo/issues'); method defaults to GET."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "API path starting with /"},
                "method": {"type": "string", "enum": ["GET", "POST", "PATCH", "PUT", "DELETE"]},
                "body": {"type": "object", "description": "JSON body for mutating methods"}
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[ServiceMode] {
        TASK_ONLY
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match require_str(call, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        if !path.starts_with('/') {
            return ToolOutput::err(&call.id, "path must start with '/'");
        }
        let Some(token) = self.ctx.github_token.clone() else {
            return ToolOutput::err(
                &call.id,
                "no GitHub token configured (set GITHUB_API_TOKEN)",
            );
        };
        let method = call
            .args
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_ascii_uppercase();
        debug!(method = %method, path = %path, "github_api");

        let client = match reqwest::Client::builder()
            .timeout(self.ctx.http_timeout)
            .user_agent("quill-agent")
            .build()
        {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("http client: {e}")),
        };

        let url = format!("{API_BASE}{path}");
        let mut req = match method.as_str() {
            "GET" => client.get(&url),
            "POST" => client.post(&url),
            "PATCH" => client.patch(&url),
            "PUT" => client.put(&url),
            "DELETE" => client.delete(&url),
            other => return ToolOutput::err(&call.id, format!("unsupported method: {other}")),
        };
        req = req
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json");
        if let Some(body) = call.args.get("body") {
            req = req.json(body);
        }

        match req.send().await {
            Ok(resp) => {
                let status = resp.status();
                let body: String = resp
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(BODY_MAX_CHARS)
                    .collect();
                if status.is_success() {
                    ToolOutput::ok(&call.id, body)
                } else {
                    ToolOutput::err(&call.id, format!("GitHub API returned {status}: {body}"))
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("request failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
