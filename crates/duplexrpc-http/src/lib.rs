//! duplexrpc-http — HTTP JSON-RPC transport for DuplexRPC.
//!
//! # Features
//! - Single requests with typed result decoding
//! - True HTTP batching with per-index error reporting
//! - Opaque caller-supplied headers and a fixed request timeout

pub mod client;

pub use client::{HttpClient, HttpClientConfig};
