use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::validation::ValidationError;

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// Application-defined code, passed through verbatim
    Application(i64),
}

impl JsonRpcErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => crate::error_codes::PARSE_ERROR,
            JsonRpcErrorCode::InvalidRequest => crate::error_codes::INVALID_REQUEST,
            JsonRpcErrorCode::MethodNotFound => crate::error_codes::METHOD_NOT_FOUND,
            JsonRpcErrorCode::InvalidParams => crate::error_codes::INVALID_PARAMS,
            JsonRpcErrorCode::InternalError => crate::error_codes::INTERNAL_ERROR,
            JsonRpcErrorCode::Application(code) => *code,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            JsonRpcErrorCode::ParseError => "Parse error",
            JsonRpcErrorCode::InvalidRequest => "Invalid Request",
            JsonRpcErrorCode::MethodNotFound => "Method not found",
            JsonRpcErrorCode::InvalidParams => "Invalid params",
            JsonRpcErrorCode::InternalError => "Internal error",
            JsonRpcErrorCode::Application(_) => "Application error",
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// JSON-RPC Error object, as carried in the `error` member of a response.
///
/// Handlers return it (through [`HandlerError::Rpc`]) to answer with an
/// application-defined code; it reaches the wire unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorObject {
    pub fn new(code: JsonRpcErrorCode, message: Option<String>, data: Option<Value>) -> Self {
        Self {
            code: code.code(),
            message: message.unwrap_or_else(|| code.message().to_string()),
            data,
        }
    }

    /// Application error with a caller-chosen code
    pub fn application(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(JsonRpcErrorCode::ParseError, None, None)
    }

    pub fn invalid_request() -> Self {
        Self::new(JsonRpcErrorCode::InvalidRequest, None, None)
    }

    pub fn method_not_found() -> Self {
        Self::new(JsonRpcErrorCode::MethodNotFound, None, None)
    }

    pub fn invalid_params(message: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::InvalidParams,
            Some(message.to_string()),
            None,
        )
    }

    /// Generic internal error. The message is fixed so handler internals
    /// never reach the wire.
    pub fn internal_error() -> Self {
        Self::new(JsonRpcErrorCode::InternalError, None, None)
    }
}

impl fmt::Display for JsonRpcErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcErrorObject {}

/// Malformed JSON at the framing boundary.
///
/// Once a frame fails to parse, message boundaries can no longer be trusted,
/// so this error terminates the session that produced it.
#[derive(Debug, Error)]
#[error("malformed JSON-RPC frame: {0}")]
pub struct ProtocolError(#[from] pub serde_json::Error);

/// Failures of an outbound call or notification
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request value was rejected before any I/O
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("request {0} is already sent")]
    DuplicateRequest(String),

    /// Encoding the request or decoding the result failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer answered with an error object
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcErrorObject),

    /// The decoded result failed validation
    #[error("invalid response from server: {0}")]
    InvalidResponse(ValidationError),

    #[error("call cancelled: {0}")]
    Cancelled(String),

    #[error("call deadline exceeded")]
    DeadlineExceeded,

    /// The session stopped reading; no response can arrive any more
    #[error("connection closed")]
    Closed,
}

impl ClientError {
    /// Wire error code if the peer answered with an error object
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc(error) => Some(error.code),
            _ => None,
        }
    }
}

/// Outcome of a failed method handler.
///
/// Only [`HandlerError::InvalidParams`] and [`HandlerError::Rpc`] carry
/// their message to the peer; everything else is answered with a generic
/// Internal Error and logged locally.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Parameters could not be decoded or failed validation
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Structured application error, passed through verbatim
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcErrorObject),

    /// The handler's result could not be encoded
    #[error("failed to encode result: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("{0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Wrap any error as an internal failure
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Internal(error.into())
    }

    /// The error object sent to the peer
    pub fn to_error_object(&self) -> JsonRpcErrorObject {
        match self {
            Self::InvalidParams(message) => JsonRpcErrorObject::invalid_params(message),
            Self::Rpc(error) => error.clone(),
            Self::Encode(_) | Self::Internal(_) => JsonRpcErrorObject::internal_error(),
        }
    }
}

impl From<JsonRpcErrorObject> for HandlerError {
    fn from(error: JsonRpcErrorObject) -> Self {
        Self::Rpc(error)
    }
}

/// Fatal outcome of a session's read loop
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("session has neither a client nor a server role")]
    NoRole,
}
