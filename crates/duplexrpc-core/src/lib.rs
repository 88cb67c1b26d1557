//! duplexrpc-core — foundation traits and types for DuplexRPC.
//!
//! # Overview
//!
//! DuplexRPC issues correlated JSON-RPC 2.0 requests over HTTP and over a
//! persistent WebSocket connection. The core crate defines:
//!
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`] — wire types with opaque payloads
//! - [`TransportError`] — structured error type shared by every transport
//! - [`EventDescriptor`] — a subscription identity and its stable hash
//! - [`ResultSlot`] — per-position output for batch results
//! - [`RpcTransport`] — the async trait every transport implements
//! - [`Namespaced`] — method-prefix wrapper around any transport

pub mod error;
pub mod event;
pub mod request;
pub mod slot;
pub mod transport;

pub use error::{BatchItemError, TransportError};
pub use event::{fnv1a64, EventDescriptor};
pub use request::{to_raw, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use slot::ResultSlot;
pub use transport::{Namespaced, RpcTransport};

pub use serde_json::value::RawValue;
