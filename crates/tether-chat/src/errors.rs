//! Chat layer error types.

use tether_gateway::GatewayError;

/// Errors produced by the chat run lifecycle and the slot governor.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// A run is already in flight for this session.
    #[error("A chat run is already in progress for this session")]
    RunInProgress,

    /// All session slots are occupied.
    #[error("All {capacity} session slots are in use")]
    PoolExhausted {
        /// Configured pool capacity.
        capacity: usize,
    },

    /// Error from the gateway operation surface.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_names_capacity() {
        let err = ChatError::PoolExhausted { capacity: 5 };
        assert!(err.to_string().contains('5'));
    }
}
