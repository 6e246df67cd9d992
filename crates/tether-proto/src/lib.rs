//! # tether-proto
//!
//! Wire-format types for the agent gateway protocol.
//!
//! All communication is JSON frames over one duplex connection:
//! - `req`: client → gateway RPC call
//! - `res`: gateway → client RPC result, matched by request id
//! - `event`: gateway → client server-push (chat deltas, notices)
//!
//! Field names follow the gateway's camelCase wire format exactly.

#![deny(unsafe_code)]

pub mod chat;
pub mod connect;
pub mod error_codes;
pub mod frames;

pub use chat::{
    AbortResult, ChatAbortParams, ChatEvent, ChatSendParams, HistoryParams, HistoryResult,
    RunState, SessionPatchParams, SessionsResult,
};
pub use connect::{ClientInfo, ConnectAuth, ConnectParams};
pub use frames::{ErrorShape, EventFrame, GatewayFrame, RequestFrame, ResponseFrame};

/// Protocol version range this client can speak.
pub const MIN_PROTOCOL: u32 = 3;
/// Newest protocol version this client understands.
pub const MAX_PROTOCOL: u32 = 4;
