//! JSON-RPC 2.0 envelope used to carry every `league.v2` message.
//!
//! Every request is one `tools/call` envelope:
//!
//! ```text
//! { "jsonrpc":"2.0", "id":<uuid>, "method":"tools/call",
//!   "params": { "name":<tool>, "arguments": <league.v2 payload> } }
//! ```
//!
//! Responses are standard JSON-RPC 2.0 results or errors. Unknown fields on
//! inbound JSON are ignored by `serde`'s default behavior — no extra
//! annotation is required for forward compatibility.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC error codes used on the wire. The `-32xxx` range is the
/// standard JSON-RPC reserved range; the `4xxxx`/`5xxxx` range is
/// `league.v2` application-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidRequest,
    UnknownTool,
    InvalidParams,
    Unauthenticated,
    RegistrationClosed,
    DuplicateId,
    UnsupportedGameType,
    CapacityExceeded,
    InvalidState,
    UnknownMatch,
    Internal,
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        match self {
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::UnknownTool => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::Unauthenticated => 40001,
            ErrorCode::RegistrationClosed => 40002,
            ErrorCode::DuplicateId => 40003,
            ErrorCode::UnsupportedGameType => 40004,
            ErrorCode::CapacityExceeded => 40005,
            ErrorCode::InvalidState => 40006,
            ErrorCode::UnknownMatch => 40007,
            ErrorCode::Internal => 50001,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::UnknownTool,
            -32602 => ErrorCode::InvalidParams,
            40001 => ErrorCode::Unauthenticated,
            40002 => ErrorCode::RegistrationClosed,
            40003 => ErrorCode::DuplicateId,
            40004 => ErrorCode::UnsupportedGameType,
            40005 => ErrorCode::CapacityExceeded,
            40006 => ErrorCode::InvalidState,
            40007 => ErrorCode::UnknownMatch,
            50001 => ErrorCode::Internal,
            _ => return None,
        })
    }
}

/// Inner `params` object of a `tools/call` request: the tool name selects
/// the `league.v2` `message_type`, and `arguments` carries the payload
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: ToolCallParams,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<String>, tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: "tools/call".to_string(),
            params: ToolCallParams {
                name: tool.into(),
                arguments,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }
}

/// A JSON-RPC 2.0 response envelope. Exactly one of `result`/`error` is
/// populated, matching the wire contract — the struct does not enforce this
/// with an enum so that `serde` round-trips a response that omits the
/// `id` field from a malformed peer without panicking (callers that care
/// check `id.is_some()` explicitly).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<String>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trips() {
        for code in [
            ErrorCode::InvalidRequest,
            ErrorCode::UnknownTool,
            ErrorCode::InvalidParams,
            ErrorCode::Unauthenticated,
            ErrorCode::RegistrationClosed,
            ErrorCode::DuplicateId,
            ErrorCode::UnsupportedGameType,
            ErrorCode::CapacityExceeded,
            ErrorCode::InvalidState,
            ErrorCode::UnknownMatch,
            ErrorCode::Internal,
        ] {
            assert_eq!(ErrorCode::from_code(code.code()), Some(code));
        }
    }

    #[test]
    fn request_serializes_with_tools_call_method() {
        let req = JsonRpcRequest::new("abc-123", "player.register.request", serde_json::json!({}));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["method"], "tools/call");
        assert_eq!(value["params"]["name"], "player.register.request");
    }

    #[test]
    fn response_deserialize_ignores_unknown_fields() {
        let raw = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {"status": "ok"},
            "extra_field_from_the_future": true
        });
        let resp: JsonRpcResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(resp.result.unwrap()["status"], "ok");
    }
}
