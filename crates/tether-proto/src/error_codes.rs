//! Error codes the gateway uses in response frames.

/// Request was malformed or missing parameters.
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
/// Method not recognized by the gateway.
pub const UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";
/// Caller lacks a valid token.
pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
/// Gateway or agent is unavailable.
pub const UNAVAILABLE: &str = "UNAVAILABLE";
/// Far-end timeout.
pub const TIMEOUT: &str = "TIMEOUT";
/// Unexpected gateway error.
pub const INTERNAL: &str = "INTERNAL";
/// Protocol version negotiation failed.
pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
