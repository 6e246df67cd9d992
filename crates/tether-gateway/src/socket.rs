//! Socket-backed implementation of the operation surface.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use tether_proto::{
    AbortResult, ChatAbortParams, ChatEvent, ChatSendParams, HistoryParams, HistoryResult,
    SessionPatchParams, SessionsResult,
};
use tether_transport::Connection;

use crate::errors::GatewayError;
use crate::ops::{AgentOps, ChatEventHandler, ChatSubscription, SendAck};

/// Primary transport: every operation is an RPC on the duplex connection.
pub struct SocketOps {
    conn: Arc<Connection>,
}

impl SocketOps {
    /// Wrap a connection.
    pub fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}

#[async_trait]
impl AgentOps for SocketOps {
    async fn send_chat(
        &self,
        session_key: &str,
        message: &str,
        idempotency_key: &str,
    ) -> Result<SendAck, GatewayError> {
        let params = ChatSendParams {
            session_key: session_key.to_owned(),
            message: message.to_owned(),
            deliver: false,
            idempotency_key: idempotency_key.to_owned(),
        };
        let payload = self
            .conn
            .request("chat.send", Some(serde_json::to_value(&params).map_err(encode_err)?))
            .await?;
        let run_id = payload
            .get("runId")
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned);
        Ok(SendAck::Accepted { run_id })
    }

    async fn history(&self, session_key: &str, limit: u32) -> Result<HistoryResult, GatewayError> {
        let params = HistoryParams {
            session_key: session_key.to_owned(),
            limit,
        };
        let payload = self
            .conn
            .request("chat.history", Some(serde_json::to_value(&params).map_err(encode_err)?))
            .await?;
        Ok(serde_json::from_value(payload).unwrap_or_default())
    }

    async fn sessions(&self) -> Result<SessionsResult, GatewayError> {
        let payload = self.conn.request("sessions.list", None).await?;
        Ok(serde_json::from_value(payload).unwrap_or_default())
    }

    async fn delete_session(&self, key: &str) -> Result<(), GatewayError> {
        let _ = self
            .conn
            .request("sessions.delete", Some(json!({ "key": key })))
            .await?;
        Ok(())
    }

    async fn set_model(&self, session_key: &str, model: &str) -> Result<(), GatewayError> {
        // Best-effort store patch so listings reflect the change; the
        // in-band command below is what actually reaches the live agent.
        let patch = SessionPatchParams {
            key: session_key.to_owned(),
            model: Some(model.to_owned()),
            thinking_level: None,
            verbose_level: None,
        };
        if let Err(e) = self
            .conn
            .request("sessions.patch", Some(serde_json::to_value(&patch).map_err(encode_err)?))
            .await
        {
            warn!(session_key, error = %e, "sessions.patch failed; in-band command still applies");
        }

        let _ = self
            .send_chat(
                session_key,
                &format!("/model {model}"),
                &uuid::Uuid::new_v4().to_string(),
            )
            .await?;
        Ok(())
    }

    async fn set_thinking(&self, session_key: &str, level: &str) -> Result<(), GatewayError> {
        let patch = SessionPatchParams {
            key: session_key.to_owned(),
            model: None,
            thinking_level: Some(level.to_owned()),
            verbose_level: None,
        };
        let _ = self
            .conn
            .request("sessions.patch", Some(serde_json::to_value(&patch).map_err(encode_err)?))
            .await?;
        Ok(())
    }

    async fn abort(
        &self,
        session_key: &str,
        run_id: Option<&str>,
    ) -> Result<AbortResult, GatewayError> {
        let params = ChatAbortParams {
            session_key: session_key.to_owned(),
            run_id: run_id.map(ToOwned::to_owned),
        };
        let payload = self
            .conn
            .request("chat.abort", Some(serde_json::to_value(&params).map_err(encode_err)?))
            .await?;
        Ok(serde_json::from_value(payload).unwrap_or_default())
    }

    fn subscribe_chat(&self, handler: ChatEventHandler) -> ChatSubscription {
        let id = self.conn.subscribe(
            "chat",
            Arc::new(move |frame| {
                let Some(payload) = frame.payload.clone() else {
                    return;
                };
                match serde_json::from_value::<ChatEvent>(payload) {
                    Ok(event) => handler(event),
                    Err(e) => debug!(error = %e, "malformed chat event dropped"),
                }
            }),
        );
        let conn = Arc::clone(&self.conn);
        ChatSubscription::new(move || {
            let _ = conn.unsubscribe(id);
        })
    }
}

fn encode_err(e: serde_json::Error) -> GatewayError {
    GatewayError::Payload(format!("encode params: {e}"))
}
