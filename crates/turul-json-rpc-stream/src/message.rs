//! Wire shapes of JSON-RPC 2.0 frames.
//!
//! Parameters, results and identifiers stay opaque [`Value`]s until a
//! handler or caller decodes them into its own types.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::JSONRPC_VERSION;
use crate::error::JsonRpcErrorObject;

/// A JSON-RPC request. A request without `id` is a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// `Some(Value::Null)` for an explicit `"id": null`, `None` when absent
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Check if this is a notification (no id)
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC response; exactly one of `result` and `error` is set on
/// frames this crate writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
    /// Echo of the request id; `null` when no request could be identified
    #[serde(default)]
    pub id: Value,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, error: JsonRpcErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Superset of [`Request`] and [`Response`] fields, decoded once per frame
/// on a duplex connection and then classified.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub id: Option<Value>,
}

impl Message {
    /// A frame is a request if and only if it names a method
    pub fn is_request(&self) -> bool {
        !self.method.is_empty()
    }

    pub fn into_request(self) -> Request {
        Request {
            jsonrpc: self.jsonrpc,
            method: self.method,
            params: self.params,
            id: self.id,
        }
    }

    pub fn into_response(self) -> Response {
        Response {
            jsonrpc: self.jsonrpc,
            result: self.result,
            error: self.error,
            id: self.id.unwrap_or(Value::Null),
        }
    }
}

/// A message as handed to an engine: either the raw frame, decoded on
/// demand, or a value the duplex path has already decoded.
#[derive(Debug)]
pub enum Incoming<'a, M> {
    Raw(&'a [u8]),
    Decoded(M),
}

impl<M: DeserializeOwned> Incoming<'_, M> {
    pub fn decode(self) -> Result<M, serde_json::Error> {
        match self {
            Incoming::Raw(frame) => serde_json::from_slice(frame),
            Incoming::Decoded(message) => Ok(message),
        }
    }
}

/// Whether a decode failure means the frame is not JSON at all.
///
/// Data errors (valid JSON of the wrong shape) are recoverable; syntax and
/// truncation errors are protocol violations.
pub(crate) fn is_malformed(error: &serde_json::Error) -> bool {
    !error.is_data()
}

/// Maps a present field, including an explicit `null`, to `Some`
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
