// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! JSON-RPC 2.0 message types shared by the hub server, the hub client,
//! and the stdio/SSE proxies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Standard JSON-RPC error codes used by the hub.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Descriptor of one callable tool, as listed by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips() {
        let req = RpcRequest::new(1, "tools/list", json!({}));
        let text = serde_json::to_string(&req).unwrap();
        let back: RpcRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(back.method, "tools/list");
        assert_eq!(back.id, Some(json!(1)));
        assert_eq!(back.jsonrpc, JSONRPC_VERSION);
    }

    #[test]
    fn request_without_params_defaults_to_null() {
        let back: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#).unwrap();
        assert!(back.params.is_null());
    }

    #[test]
    fn ok_response_has_no_error() {
        let r = RpcResponse::ok(Some(json!(2)), json!({"success": true}));
        let text = serde_json::to_string(&r).unwrap();
        assert!(!text.contains("error"));
        assert!(text.contains("success"));
    }

    #[test]
    fn err_response_has_no_result() {
        let r = RpcResponse::err(Some(json!(3)), codes::METHOD_NOT_FOUND, "nope");
        let text = serde_json::to_string(&r).unwrap();
        assert!(!text.contains("result"));
        let back: RpcResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(back.error.unwrap().code, codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn tool_descriptor_uses_camel_case_schema_key() {
        let d = ToolDescriptor {
            name: "store_memory".into(),
            description: "d".into(),
            input_schema: json!({"type": "object"}),
        };
        let text = serde_json::to_string(&d).unwrap();
        assert!(text.contains("inputSchema"));
    }
}
