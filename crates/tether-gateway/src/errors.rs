//! Gateway error types.

use tether_transport::TransportError;

/// Errors produced by the gateway operation surface.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Error from the primary socket transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The primary transport failed and fallback is disabled.
    #[error("Primary transport unavailable: {message}")]
    TransportUnavailable {
        /// The primary error's message.
        message: String,
    },

    /// The fallback executable could not be located.
    #[error("Fallback CLI not found")]
    CliNotFound,

    /// The fallback subprocess failed (spawn error, non-zero exit, bad JSON).
    #[error("Fallback invocation failed: {0}")]
    Fallback(String),

    /// A response payload did not have the expected shape.
    #[error("Unexpected payload: {0}")]
    Payload(String),
}

impl GatewayError {
    /// Whether this error means the transport itself is down, as opposed to
    /// the far end answering with a business error. Only transport-down
    /// failures trigger fallback demotion.
    pub fn is_transport_failure(&self) -> bool {
        match self {
            Self::Transport(e) => matches!(
                e,
                TransportError::Connect(_)
                    | TransportError::ConnectTimeout(_)
                    | TransportError::NotConnected
                    | TransportError::RequestTimeout { .. }
                    | TransportError::Closed
            ),
            Self::TransportUnavailable { .. } => true,
            Self::CliNotFound | Self::Fallback(_) | Self::Payload(_) => false,
        }
    }
}
