//! Transport-level error types.

use thiserror::Error;

use crate::request::{JsonRpcError, RequestId};

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, non-2xx status, timeout, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket dial/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC protocol-level error returned by the server.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Response or result payload could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Request could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(serde_json::Error),

    /// Response carried neither `result` nor `error`.
    #[error("Malformed response (id: {id:?}): neither result nor error")]
    MalformedResponse { id: Option<RequestId> },

    /// No response arrived within the configured call timeout.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The pending call was torn down before a response was delivered.
    #[error("Call cancelled: connection closed before a response arrived")]
    Cancelled,

    /// The connection is closed or has failed; nothing more can be sent.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Batch response has no output slot at this index.
    #[error("result array has no index at: {index}")]
    MissingSlot { index: usize },

    /// Batch request got no response for this id.
    #[error("no response for batch request {id}")]
    MissingResponse { id: RequestId },

    /// Batch response echoed an id that was never requested.
    #[error("response id {id:?} does not match any batch request")]
    UnknownId { id: Option<RequestId> },

    /// Endpoint URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A configured header name or value is not valid.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

impl TransportError {
    /// Returns `true` for errors fatal to the underlying connection.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::WebSocket(_) | Self::ConnectionClosed
        )
    }

    /// Returns `true` if the server answered with a JSON-RPC error object.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Returns `true` if the call deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The server's error object, if this is a protocol error.
    pub fn rpc_error(&self) -> Option<&JsonRpcError> {
        match self {
            Self::Rpc(err) => Some(err),
            _ => None,
        }
    }
}

/// One failed position of a batch request.
#[derive(Debug, Error)]
pub struct BatchItemError {
    /// Request index of the failed entry. `None` when the server answered with
    /// an id that matches no outstanding request.
    pub index: Option<usize>,
    #[source]
    pub error: TransportError,
}

impl std::fmt::Display for BatchItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(index) => write!(f, "batch index {index}: {}", self.error),
            None => write!(f, "unmatched batch response: {}", self.error),
        }
    }
}
