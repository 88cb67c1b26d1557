//! duplexrpc-ws — WebSocket JSON-RPC transport for DuplexRPC.
//!
//! # Features
//! - Request multiplexing over a single connection, correlated by id
//! - Per-call timeout with race-free cleanup of the pending entry
//! - Event subscriptions deduplicated by descriptor hash
//! - Local teardown on close: every waiter observes cancellation
//!
//! Reconnection is left to the caller: watch [`WsClient::closed`] and dial again.

pub mod client;
pub mod events;
mod registry;

pub use client::{ConnectionState, WsClient, WsClientConfig};
pub use events::{EventReceiver, SUBSCRIBE, UNSUBSCRIBE};
