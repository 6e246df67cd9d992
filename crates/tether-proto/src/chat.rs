//! Chat and session method params and the `chat` event payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Params for `chat.send`. Completion is observed via `chat` events, not the
/// RPC response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendParams {
    /// Target session.
    pub session_key: String,
    /// Message text.
    pub message: String,
    /// Always `false`: the reply streams back as events instead of being
    /// delivered to configured channels.
    pub deliver: bool,
    /// Caller-generated token letting the gateway dedupe retried sends.
    pub idempotency_key: String,
}

/// Lifecycle state carried by a `chat` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Incremental partial output.
    Delta,
    /// Terminal: reply complete.
    Final,
    /// Terminal: run was aborted.
    Aborted,
    /// Terminal: run failed.
    Error,
}

impl RunState {
    /// Whether this state ends a run.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Final | Self::Aborted | Self::Error)
    }
}

/// Payload of a `chat` event.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    /// Session the run belongs to. The gateway may namespace this with an
    /// agent prefix, so match by suffix.
    pub session_key: String,
    /// Server-issued run identifier.
    pub run_id: String,
    /// Lifecycle state.
    pub state: RunState,
    /// Accumulated reply text so far (delta/final).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error description (state == error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Params for `chat.abort`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAbortParams {
    /// Session whose run(s) to stop.
    pub session_key: String,
    /// Specific run; when absent the gateway aborts whatever is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Result of `chat.abort`. The gateway is authoritative on what stopped.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortResult {
    /// Whether anything was aborted.
    pub aborted: bool,
    /// Runs the gateway actually stopped.
    #[serde(default)]
    pub run_ids: Vec<String>,
}

/// Params for `chat.history`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    /// Target session.
    pub session_key: String,
    /// Maximum messages to return.
    pub limit: u32,
}

/// Result of `chat.history`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistoryResult {
    /// Messages, newest last. Shape is gateway-defined; the client forwards
    /// them opaquely.
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// Result of `sessions.list`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionsResult {
    /// Known sessions, gateway-defined shape.
    #[serde(default)]
    pub sessions: Vec<Value>,
}

/// Params for `sessions.patch`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatchParams {
    /// Session key.
    pub key: String,
    /// Model override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Thinking level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
    /// Verbosity level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose_level: Option<String>,
}
