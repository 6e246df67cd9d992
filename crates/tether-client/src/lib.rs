//! # tether-client
//!
//! The crate an editor embeds: configuration, tracing setup, and a facade
//! that wires the transport, gateway, and chat layers together into bounded
//! per-session chat surfaces.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod logging;

pub use client::{ChatSurface, TetherClient};
pub use config::TetherConfig;
pub use logging::init_subscriber;

pub use tether_chat::{ChatError, DeltaSink, RunOutcome};
pub use tether_gateway::GatewayMode;
pub use tether_transport::ConnectionState;
