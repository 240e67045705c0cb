//! JSON-RPC 2.0 response envelope and error codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PROTOCOL_VERSION;

/// JSON-RPC 2.0 error codes used on the wire.
pub mod code {
    /// The request line was not valid JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// The parsed value was not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The requested method is not registered.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// The method parameters were malformed.
    pub const INVALID_PARAMS: i64 = -32602;
    /// An unexpected failure escaped request handling.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Reserved application code for execution failures; current handlers
    /// report execution outcomes inside a successful result instead.
    pub const EXECUTION_ERROR: i64 = -32000;
    /// Reserved application code for timeouts; unused for the same reason.
    pub const TIMEOUT: i64 = -32001;
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    /// JSON-RPC error code (see [`code`]).
    pub code: i64,
    /// Human-readable description of the failure.
    pub message: String,
    /// Optional diagnostic detail, omitted when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A single JSON-RPC response line.
///
/// Exactly one of `result` / `error` is populated; the constructors enforce
/// this. The `id` echoes the request id and is omitted entirely (never
/// `null`) when the request failed before an id could be recovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always [`PROTOCOL_VERSION`].
    pub jsonrpc: String,
    /// Echo of the client-chosen request id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    /// Builds a success response echoing `id` when the request carried one.
    #[must_use]
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response; `id` is `None` when the request was too
    /// malformed to recover one.
    #[must_use]
    pub fn failure(id: Option<Value>, error: RpcErrorObject) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION.to_owned(),
            id,
            result: None,
            error: Some(error),
        }
    }
}
