//! The operation surface both transports implement.

use std::sync::Arc;

use async_trait::async_trait;
use tether_proto::{AbortResult, ChatEvent, HistoryResult, SessionsResult};

use crate::errors::GatewayError;

/// Handler invoked for each inbound chat event.
pub type ChatEventHandler = Arc<dyn Fn(ChatEvent) + Send + Sync>;

/// Acknowledgment of a chat send.
#[derive(Clone, Debug)]
pub enum SendAck {
    /// The gateway accepted the send; completion arrives via chat events.
    Accepted {
        /// Server-issued run id, when the ack names one.
        run_id: Option<String>,
    },
    /// The fallback subprocess ran to completion and returned the reply
    /// directly; there will be no events.
    Completed {
        /// Full reply text.
        text: String,
    },
}

/// Guard for a chat event subscription; unsubscribes on drop.
pub struct ChatSubscription {
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl ChatSubscription {
    /// Guard that runs `cleanup` once, on drop.
    pub fn new(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cleanup: Some(Box::new(cleanup)),
        }
    }

    /// Guard with nothing to clean up (fallback transport has no events).
    pub fn none() -> Self {
        Self { cleanup: None }
    }
}

impl Drop for ChatSubscription {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// Operations the editor surface needs from the agent gateway.
///
/// Implemented by the socket transport, the CLI fallback, and the
/// dual-transport [`crate::Gateway`] itself.
#[async_trait]
pub trait AgentOps: Send + Sync {
    /// Send a chat message. Fire-and-forget with respect to the agent
    /// reply: only the gateway's receipt ack is awaited.
    async fn send_chat(
        &self,
        session_key: &str,
        message: &str,
        idempotency_key: &str,
    ) -> Result<SendAck, GatewayError>;

    /// Fetch recent history for a session.
    async fn history(&self, session_key: &str, limit: u32) -> Result<HistoryResult, GatewayError>;

    /// List known sessions.
    async fn sessions(&self) -> Result<SessionsResult, GatewayError>;

    /// Delete a session.
    async fn delete_session(&self, key: &str) -> Result<(), GatewayError>;

    /// Switch the session's model.
    ///
    /// Routed through the conversational channel as a structured in-band
    /// command; only the in-band path is guaranteed to affect the live
    /// agent context on the next turn. A store patch alone is not enough.
    async fn set_model(&self, session_key: &str, model: &str) -> Result<(), GatewayError>;

    /// Set the session's thinking level.
    async fn set_thinking(&self, session_key: &str, level: &str) -> Result<(), GatewayError>;

    /// Ask the gateway to stop a run. The gateway is authoritative on what
    /// actually stops; callers observe termination via events.
    async fn abort(
        &self,
        session_key: &str,
        run_id: Option<&str>,
    ) -> Result<AbortResult, GatewayError>;

    /// Subscribe to chat events. The fallback transport has none and
    /// returns an empty guard.
    fn subscribe_chat(&self, handler: ChatEventHandler) -> ChatSubscription;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn subscription_guard_runs_cleanup_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let guard = ChatSubscription::new(move || {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });
        drop(guard);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_guard_is_harmless() {
        let guard = ChatSubscription::none();
        drop(guard);
    }
}
