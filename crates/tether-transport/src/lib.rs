//! # tether-transport
//!
//! One authenticated duplex channel to the agent gateway.
//!
//! A single actor task owns the WebSocket and the pending-request table;
//! [`Connection::request`] and [`Connection::subscribe`] are the only
//! operations exposed across concurrency boundaries. Inbound frames are
//! processed in arrival order: responses complete their pending request by
//! id, events fan out synchronously to subscribed handlers.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod subscriptions;

pub use connection::{ConnectConfig, Connection, ConnectionState};
pub use errors::TransportError;
pub use subscriptions::{EventHandler, SubscriptionId};
