//! # tether-chat
//!
//! Chat run lifecycle on top of the gateway operation surface.
//!
//! A [`ChatRunner`] drives one send at a time for one session: it issues the
//! send, streams deltas into a sink as they arrive, and resolves to exactly
//! one terminal outcome. The [`SlotPool`] governor bounds how many chat
//! surfaces may be open at once and hands out the lowest free slot number.

#![deny(unsafe_code)]

pub mod errors;
pub mod governor;
pub mod runner;

pub use errors::ChatError;
pub use governor::{SlotLease, SlotPool, DEFAULT_POOL_CAPACITY};
pub use runner::{ChatRunner, DeltaSink, RunOutcome, DEFAULT_IDLE_TIMEOUT};
