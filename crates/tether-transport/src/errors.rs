//! Transport error types.

/// Errors produced by the gateway connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket-level connect failure.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The socket or handshake did not complete in time.
    #[error("Connect timed out after {0}ms")]
    ConnectTimeout(u64),

    /// The gateway refused the handshake.
    #[error("Handshake rejected: {message}")]
    HandshakeRejected {
        /// Gateway error code.
        code: String,
        /// Gateway error message.
        message: String,
    },

    /// A `connect()` is already in flight.
    #[error("Connect already in flight")]
    AlreadyConnecting,

    /// The connection is already established.
    #[error("Already connected")]
    AlreadyConnected,

    /// No connection is established.
    #[error("Not connected")]
    NotConnected,

    /// No response arrived within the request timeout.
    #[error("Request {method} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Method that timed out.
        method: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The far end answered with an error payload.
    #[error("Request rejected ({code}): {message}")]
    Rejected {
        /// Gateway error code.
        code: String,
        /// Gateway error message.
        message: String,
    },

    /// The connection closed while the request was pending.
    #[error("Connection closed")]
    Closed,
}
