//! Protocol-level failures and their wire error codes.

use serde_json::Value;
use thiserror::Error;

use crucible_protocol::{code, RpcErrorObject};

/// A request that could not be routed to a handler, or a handler that
/// failed outside the execution result channel.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The line was not valid JSON.
    #[error("Parse error: {0}")]
    Parse(String),
    /// The envelope was JSON but not a valid request.
    #[error("{0}")]
    InvalidRequest(String),
    /// No handler is registered for the named method.
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    /// The method's parameters were missing or malformed.
    #[error("{0}")]
    InvalidParams(String),
    /// A handler failed internally.
    #[error("Internal error: {message}")]
    Internal {
        /// Summary suitable for the client.
        message: String,
        /// Detail attached to the error's `data` field.
        detail: Option<String>,
    },
}

impl DispatchError {
    pub(crate) fn parse(error: &serde_json::Error) -> Self {
        Self::Parse(error.to_string())
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub(crate) fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    pub(crate) fn internal(message: impl Into<String>, detail: Option<String>) -> Self {
        Self::Internal {
            message: message.into(),
            detail,
        }
    }

    /// JSON-RPC error code for this failure.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => code::PARSE_ERROR,
            Self::InvalidRequest(_) => code::INVALID_REQUEST,
            Self::MethodNotFound(_) => code::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => code::INVALID_PARAMS,
            Self::Internal { .. } => code::INTERNAL_ERROR,
        }
    }

    /// Supplementary `data` payload, when the variant carries one.
    #[must_use]
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::Internal {
                detail: Some(detail),
                ..
            } => Some(Value::String(detail.clone())),
            _ => None,
        }
    }

    /// Renders this failure as a wire error object.
    #[must_use]
    pub fn to_error_object(&self) -> RpcErrorObject {
        RpcErrorObject {
            code: self.code(),
            message: self.to_string(),
            data: self.data(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_wire_contract() {
        assert_eq!(DispatchError::Parse("bad".into()).code(), -32700);
        assert_eq!(DispatchError::invalid_request("bad").code(), -32600);
        assert_eq!(DispatchError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(DispatchError::invalid_params("bad").code(), -32602);
        assert_eq!(DispatchError::internal("bad", None).code(), -32603);
    }

    #[test]
    fn method_not_found_names_the_method() {
        let error = DispatchError::MethodNotFound("frobnicate".into());
        assert_eq!(error.to_string(), "Method not found: frobnicate");
    }

    #[test]
    fn internal_detail_lands_in_data() {
        let error = DispatchError::internal("boom", Some("trace".into()));
        let object = error.to_error_object();
        assert_eq!(object.code, -32603);
        assert_eq!(object.data, Some(Value::String("trace".into())));
    }
}
