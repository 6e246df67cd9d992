//! Dual-transport gateway with permanent fallback demotion.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use tether_proto::{AbortResult, HistoryResult, SessionsResult};

use crate::errors::GatewayError;
use crate::ops::{AgentOps, ChatEventHandler, ChatSubscription, SendAck};

/// Which transport currently serves operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GatewayMode {
    /// The duplex socket connection.
    Primary,
    /// The spawned CLI subprocess.
    Fallback,
}

/// One operation surface over two transports.
///
/// Starts on the primary transport. When a primary operation fails because
/// the transport itself is down and a fallback is configured, the gateway
/// demotes itself to the fallback for the rest of the process lifetime and
/// retries the operation there. Far-end rejections never demote: the
/// transport is working, the request was refused.
pub struct Gateway {
    primary: Arc<dyn AgentOps>,
    fallback: Option<Arc<dyn AgentOps>>,
    mode: Mutex<GatewayMode>,
}

impl Gateway {
    /// Build from explicit transports.
    pub fn new(primary: Arc<dyn AgentOps>, fallback: Option<Arc<dyn AgentOps>>) -> Self {
        Self {
            primary,
            fallback,
            mode: Mutex::new(GatewayMode::Primary),
        }
    }

    /// The current transport mode.
    pub fn mode(&self) -> GatewayMode {
        *self.mode.lock()
    }

    /// Whether a fallback transport is configured.
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    fn active(&self) -> Arc<dyn AgentOps> {
        match self.mode() {
            GatewayMode::Primary => Arc::clone(&self.primary),
            // Mode only becomes Fallback when a fallback exists.
            GatewayMode::Fallback => self
                .fallback
                .as_ref()
                .map_or_else(|| Arc::clone(&self.primary), Arc::clone),
        }
    }

    /// Handle a primary-transport failure: demote and hand back the
    /// fallback, or surface the failure if no fallback is configured.
    /// Without a fallback the mode stays `Primary` so a recovered socket
    /// keeps serving.
    fn demote(&self, cause: &GatewayError) -> Result<Arc<dyn AgentOps>, GatewayError> {
        match &self.fallback {
            Some(fb) => {
                let mut mode = self.mode.lock();
                if *mode == GatewayMode::Primary {
                    warn!(error = %cause, "primary transport down; demoting to fallback CLI");
                    *mode = GatewayMode::Fallback;
                } else {
                    info!(error = %cause, "primary transport failure after demotion");
                }
                Ok(Arc::clone(fb))
            }
            None => Err(GatewayError::TransportUnavailable {
                message: cause.to_string(),
            }),
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $op:ident ( $($arg:expr),* )) => {{
        let ops = $self.active();
        match ops.$op($($arg),*).await {
            Err(e) if $self.mode() == GatewayMode::Primary && e.is_transport_failure() => {
                let fb = $self.demote(&e)?;
                fb.$op($($arg),*).await
            }
            other => other,
        }
    }};
}

#[async_trait]
impl AgentOps for Gateway {
    async fn send_chat(
        &self,
        session_key: &str,
        message: &str,
        idempotency_key: &str,
    ) -> Result<SendAck, GatewayError> {
        dispatch!(self, send_chat(session_key, message, idempotency_key))
    }

    async fn history(&self, session_key: &str, limit: u32) -> Result<HistoryResult, GatewayError> {
        dispatch!(self, history(session_key, limit))
    }

    async fn sessions(&self) -> Result<SessionsResult, GatewayError> {
        dispatch!(self, sessions())
    }

    async fn delete_session(&self, key: &str) -> Result<(), GatewayError> {
        dispatch!(self, delete_session(key))
    }

    async fn set_model(&self, session_key: &str, model: &str) -> Result<(), GatewayError> {
        dispatch!(self, set_model(session_key, model))
    }

    async fn set_thinking(&self, session_key: &str, level: &str) -> Result<(), GatewayError> {
        dispatch!(self, set_thinking(session_key, level))
    }

    async fn abort(
        &self,
        session_key: &str,
        run_id: Option<&str>,
    ) -> Result<AbortResult, GatewayError> {
        dispatch!(self, abort(session_key, run_id))
    }

    fn subscribe_chat(&self, handler: ChatEventHandler) -> ChatSubscription {
        self.active().subscribe_chat(handler)
    }
}
