//! Gateway wire protocol: message envelope + event types.
//!
//! This crate defines the JSON shape of every message exchanged between the
//! gateway and its channel adapters. It does not depend on mahout; the gateway
//! and the core both build on these types.

pub mod event;
pub mod message;

pub use event::EventType;
pub use message::{GatewayMessage, MessageType};
