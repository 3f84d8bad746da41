// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use quill_config::ServiceMode;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    /// If true, the tool execution failed non-fatally (returned error message).
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
        }
    }
}

/// Trait that every built-in tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// The service modes in which this tool is available.
    fn modes(&self) -> &[ServiceMode];
    /// Execute the tool.  Errors should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

/// Extract a required string argument.  The error text echoes what was
/// actually received so the model can correct itself.
pub(crate) fn require_str(call: &ToolCall, key: &str) -> Result<String, ToolOutput> {
    match call.args.get(key).and_then(Value::as_str) {
        Some(v) => Ok(v.to_string()),
        None => {
            let args_preview =
                serde_json::to_string(&call.args).unwrap_or_else(|_| "null".to_string());
            Err(ToolOutput::err(
                &call.id,
                format!("missing required parameter '{key}'. Received: {args_preview}"),
            ))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "t1".into(),
            name: "test".into(),
            args,
        }
    }

    #[test]
    fn ok_output_is_not_error() {
        let out = ToolOutput::ok("id", "fine");
        assert!(!out.is_error);
        assert_eq!(out.content, "fine");
    }

    #[test]
    fn err_output_is_error() {
        let out = ToolOutput::err("id", "broken");
        assert!(out.is_error);
    }

    #[test]
    fn require_str_returns_value() {
        let c = call(json!({"path": "a.md"}));
        assert_eq!(require_str(&c, "path").unwrap(), "a.md");
    }

    #[test]
    fn require_str_reports_missing_with_preview() {
        let c = call(json!({"other": 1}));
        let err = require_str(&c, "path").unwrap_err();
        assert!(err.is_error);
        assert!(err.content.contains("missing required parameter 'path'"));
        assert!(err.content.contains("other"));
    }
}
