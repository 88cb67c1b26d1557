//! The `RpcTransport` trait — the seam every transport implements.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;

use crate::error::TransportError;
use crate::request::{to_raw, JsonRpcResponse};

/// A JSON-RPC transport: HTTP, WebSocket, or a wrapper around either.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// `send_raw` and `url` are object-safe; `call` is only available on sized
/// implementors.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Issue `method` with already-serialized params and return the raw
    /// response. Protocol errors are left inside the response.
    async fn send_raw(
        &self,
        method: &str,
        params: Option<Box<RawValue>>,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Return the transport's endpoint.
    fn url(&self) -> &str;

    /// Convenience: serialize `params`, call `method` and decode the result.
    async fn call<P, T>(&self, method: &str, params: &P) -> Result<T, TransportError>
    where
        Self: Sized,
        P: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let params = to_raw(params)?;
        let resp = self.send_raw(method, Some(params)).await?;
        resp.decode()
    }
}

#[async_trait]
impl<T: RpcTransport + ?Sized> RpcTransport for Arc<T> {
    async fn send_raw(
        &self,
        method: &str,
        params: Option<Box<RawValue>>,
    ) -> Result<JsonRpcResponse, TransportError> {
        (**self).send_raw(method, params).await
    }

    fn url(&self) -> &str {
        (**self).url()
    }
}

/// Prefixes every method name before delegating, so several services
/// (e.g. `node.` and `wallet.`) can share one connection.
pub struct Namespaced<T> {
    prefix: String,
    inner: T,
}

impl<T: RpcTransport> Namespaced<T> {
    pub fn new(prefix: impl Into<String>, inner: T) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: RpcTransport> RpcTransport for Namespaced<T> {
    async fn send_raw(
        &self,
        method: &str,
        params: Option<Box<RawValue>>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let method = format!("{}{}", self.prefix, method);
        self.inner.send_raw(&method, params).await
    }

    fn url(&self) -> &str {
        self.inner.url()
    }
}
