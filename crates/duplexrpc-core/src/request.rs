//! JSON-RPC 2.0 wire types.
//!
//! `params`, `result` and `error.data` are carried as [`RawValue`]: the core
//! moves serialized bytes and leaves decoding to whoever knows the shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::error::TransportError;

/// Numeric request id. Both transports only ever emit numbers.
pub type RequestId = u64;

/// Protocol version tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

fn version() -> String {
    JSONRPC_VERSION.into()
}

/// Serialize `value` into an opaque params payload.
pub fn to_raw<P: Serialize + ?Sized>(value: &P) -> Result<Box<RawValue>, TransportError> {
    serde_json::value::to_raw_value(value).map_err(TransportError::Serialization)
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: RequestId,
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,
}

impl JsonRpcRequest {
    /// Create a request whose params are already serialized.
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Box<RawValue>>) -> Self {
        Self {
            id,
            jsonrpc: version(),
            method: method.into(),
            params,
        }
    }

    /// Create a request, serializing `params`.
    pub fn with_params<P: Serialize + ?Sized>(
        id: RequestId,
        method: impl Into<String>,
        params: &P,
    ) -> Result<Self, TransportError> {
        Ok(Self::new(id, method, Some(to_raw(params)?)))
    }

    /// Encode this request as a single JSON text frame.
    pub fn to_frame(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(TransportError::Serialization)
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
///
/// `result` is `None` only when the key is absent; `"result": null` is kept
/// as a present `null` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default = "version")]
    pub jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

impl JsonRpcResponse {
    /// Successful response carrying `result`.
    pub fn success(id: RequestId, result: Box<RawValue>) -> Self {
        Self {
            id: Some(id),
            jsonrpc: version(),
            result: Some(result),
            error: None,
        }
    }

    /// Failed response carrying `error`.
    pub fn failure(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            id: Some(id),
            jsonrpc: version(),
            result: None,
            error: Some(error),
        }
    }

    /// Returns `true` if this is a successful response (has result, no error).
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }

    /// Unwrap the raw result payload.
    ///
    /// A protocol error wins over any result; a response with neither is
    /// reported as malformed.
    pub fn into_result(self) -> Result<Box<RawValue>, TransportError> {
        if let Some(err) = self.error {
            return Err(TransportError::Rpc(err));
        }
        self.result
            .ok_or(TransportError::MalformedResponse { id: self.id })
    }

    /// Decode the result into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        if let Some(err) = &self.error {
            return Err(TransportError::Rpc(err.clone()));
        }
        let raw = self
            .result
            .as_deref()
            .ok_or(TransportError::MalformedResponse { id: self.id })?;
        serde_json::from_str(raw.get()).map_err(TransportError::Deserialization)
    }
}
