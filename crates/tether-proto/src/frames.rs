//! Frame types: the tagged `req`/`res`/`event` union on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → gateway RPC request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Per-connection monotonic, process-unique request id.
    pub id: String,
    /// Method name (e.g. `chat.send`).
    pub method: String,
    /// Optional parameters object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Gateway → client RPC response, matched to a request by `id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Echoed request id.
    pub id: String,
    /// Whether the call succeeded.
    pub ok: bool,
    /// Result payload (present when `ok == true`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error payload (present when `ok == false`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

/// Gateway → client server-push event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name (e.g. `chat`).
    pub event: String,
    /// Event payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Per-connection sequence number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Opaque server state version, forwarded as-is.
    #[serde(rename = "stateVersion", skip_serializing_if = "Option::is_none")]
    pub state_version: Option<Value>,
}

/// Structured error body inside a response frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorShape {
    /// Machine-readable error code (e.g. `UNAVAILABLE`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorShape {
    /// Build an error shape from code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }
}

/// Discriminated union of every frame the connection can carry.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    /// RPC request.
    #[serde(rename = "req")]
    Request(RequestFrame),
    /// RPC response.
    #[serde(rename = "res")]
    Response(ResponseFrame),
    /// Server-push event.
    #[serde(rename = "event")]
    Event(EventFrame),
}

impl GatewayFrame {
    /// Build a request frame.
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(RequestFrame {
            id: id.into(),
            method: method.into(),
            params,
        })
    }
}

impl ResponseFrame {
    /// Build a success response.
    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Build an error response.
    pub fn err(id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}
