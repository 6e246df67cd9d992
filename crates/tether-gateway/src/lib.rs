//! # tether-gateway
//!
//! One operation surface over two structurally different transports.
//!
//! The primary transport is the duplex socket connection; the fallback is a
//! spawned external process that prints JSON on stdout. A single mode flag
//! owned by the [`Gateway`] selects between them: a primary transport
//! failure with fallback enabled demotes the gateway permanently for the
//! process lifetime. Callers notice nothing but latency.

#![deny(unsafe_code)]

pub mod cli;
pub mod errors;
pub mod gateway;
pub mod ops;
pub mod socket;

pub use cli::CliTransport;
pub use errors::GatewayError;
pub use gateway::{Gateway, GatewayMode};
pub use ops::{AgentOps, ChatEventHandler, ChatSubscription, SendAck};
pub use socket::SocketOps;
