//! WebSocket JSON-RPC connection manager.
//!
//! One background task owns the socket: it is the only writer and the only
//! reader. Callers hand it frames over a command channel and wait for their
//! response on a private channel registered in the pending-call table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use duplexrpc_core::error::TransportError;
use duplexrpc_core::request::{JsonRpcRequest, JsonRpcResponse, RequestId};
use duplexrpc_core::transport::RpcTransport;
use duplexrpc_core::RawValue;

use crate::registry::{Dispatch, Registry, Slot};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the WebSocket client.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// How long a call waits for its response. `Duration::ZERO` waits forever.
    pub call_timeout: Duration,
    /// Headers sent with the upgrade request (credentials etc.). Not inspected.
    pub headers: Vec<(String, String)>,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(3),
            headers: Vec::new(),
        }
    }
}

impl WsClientConfig {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Lifecycle of one connection. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// Closed locally via [`WsClient::close`].
    Closed,
    /// The read loop stopped on a socket error; carries the reason.
    Failed(String),
}

enum WsCommand {
    Send {
        frame: String,
        done: oneshot::Sender<Result<(), TransportError>>,
    },
    Close {
        done: Option<oneshot::Sender<Result<(), TransportError>>>,
    },
}

struct Shared {
    registry: Mutex<Registry>,
    state: watch::Sender<ConnectionState>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move out of `Open`; later transitions are ignored.
    fn finish(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Open {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

/// WebSocket JSON-RPC client.
///
/// Owns one connection from [`WsClient::dial`] to [`WsClient::close`].
/// Request ids start at 1 and are never reused; id 0 is left for
/// [`WsClient::raw_call`] handshakes.
pub struct WsClient {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    call_timeout_ns: AtomicU64,
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl WsClient {
    /// Connect to `url` and start the background read loop.
    pub async fn dial(
        url: impl Into<String>,
        config: WsClientConfig,
    ) -> Result<Self, TransportError> {
        let url = url.into();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidHeader(format!("{name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidHeader(format!("{name}: {e}")))?;
            request.headers_mut().append(name, value);
        }

        tracing::info!(url = %url, "connecting via WebSocket");
        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Open);
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            state,
        });

        tokio::spawn(connection_task(url.clone(), ws, cmd_rx, shared.clone()));

        Ok(Self {
            url,
            cmd_tx,
            shared,
            next_id: AtomicU64::new(1),
            call_timeout_ns: AtomicU64::new(as_nanos(config.call_timeout)),
        })
    }

    /// Connect with default configuration.
    pub async fn dial_default(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::dial(url, WsClientConfig::default()).await
    }

    /// Call `method` and return the raw response envelope.
    ///
    /// Protocol errors stay inside the response; the `Err` side carries
    /// transport, timeout and cancellation failures.
    pub async fn call_raw(
        &self,
        method: &str,
        params: Option<Box<RawValue>>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let id = self.next_id();
        let frame = JsonRpcRequest::new(id, method, params).to_frame()?;
        self.raw_call(id, frame).await
    }

    /// Send a pre-serialized `frame` and wait for the response echoing `id`.
    ///
    /// Intended for out-of-band frames (id 0) that are not built by
    /// [`WsClient::call_raw`]. Fails if `id` is already in flight.
    pub async fn raw_call(
        &self,
        id: RequestId,
        frame: String,
    ) -> Result<JsonRpcResponse, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.round_trip(id, frame, Slot::Call(tx), rx).await
    }

    /// Close every pending call and subscription locally, then close the
    /// socket. No `unsubscribe` is sent.
    pub async fn close(&self) -> Result<(), TransportError> {
        let dropped = self.registry().teardown();
        self.shared.finish(ConnectionState::Closed);
        tracing::info!(url = %self.url, dropped, "closing WebSocket");

        let (done, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(WsCommand::Close { done: Some(done) })
            .is_err()
        {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    /// Watch lifecycle transitions; receives `Failed` once if the read loop dies.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the connection leaves `Open` and return the terminal state.
    pub async fn closed(&self) -> ConnectionState {
        let mut rx = self.shared.state.subscribe();
        let state = match rx.wait_for(|s| *s != ConnectionState::Open).await {
            Ok(state) => state.clone(),
            Err(_) => ConnectionState::Closed,
        };
        state
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_nanos(self.call_timeout_ns.load(Ordering::Relaxed))
    }

    /// Change the call timeout for subsequent calls. `Duration::ZERO` waits forever.
    pub fn set_call_timeout(&self, timeout: Duration) {
        self.call_timeout_ns
            .store(as_nanos(timeout), Ordering::Relaxed);
    }

    /// Number of calls and subscriptions waiting on the read loop.
    pub fn pending_count(&self) -> usize {
        self.registry().pending_len()
    }

    pub(crate) fn next_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.shared.registry()
    }

    /// Register `slot`, write `frame`, then wait on `rx` under the call timeout.
    pub(crate) async fn round_trip(
        &self,
        id: RequestId,
        frame: String,
        slot: Slot,
        rx: oneshot::Receiver<JsonRpcResponse>,
    ) -> Result<JsonRpcResponse, TransportError> {
        self.registry().register(id, slot)?;
        let mut guard = PendingGuard {
            shared: &self.shared,
            id,
            armed: true,
        };

        self.write(frame).await?;
        let result = self.wait(id, rx).await;
        guard.armed = false;
        result
    }

    async fn write(&self, frame: String) -> Result<(), TransportError> {
        let (done, rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Send { frame, done })
            .map_err(|_| TransportError::ConnectionClosed)?;
        rx.await.map_err(|_| TransportError::ConnectionClosed)?
    }

    async fn wait(
        &self,
        id: RequestId,
        mut rx: oneshot::Receiver<JsonRpcResponse>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let timeout = self.call_timeout();
        if timeout.is_zero() {
            return rx.await.map_err(|_| TransportError::Cancelled);
        }

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(TransportError::Cancelled),
            Err(_) => {
                // Keyed by this call's id; a response may have won the race.
                let removed = self.registry().cancel(id);
                match rx.try_recv() {
                    Ok(resp) => Ok(resp),
                    Err(_) if removed => {
                        tracing::debug!(id, "call timed out");
                        Err(TransportError::Timeout {
                            ms: timeout.as_millis() as u64,
                        })
                    }
                    Err(_) => Err(TransportError::Cancelled),
                }
            }
        }
    }
}

/// Drops the pending entry of a call whose future went away before it
/// finished (outer timeout, `select!`, task abort) or whose write failed.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: RequestId,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.registry().abandon(self.id);
        }
    }
}

/// Saturating nanosecond count; `0` keeps meaning "wait forever".
fn as_nanos(timeout: Duration) -> u64 {
    timeout.as_nanos().min(u64::MAX as u128) as u64
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.registry().teardown();
        self.shared.finish(ConnectionState::Closed);
        let _ = self.cmd_tx.send(WsCommand::Close { done: None });
    }
}

#[async_trait]
impl RpcTransport for WsClient {
    async fn send_raw(
        &self,
        method: &str,
        params: Option<Box<RawValue>>,
    ) -> Result<JsonRpcResponse, TransportError> {
        self.call_raw(method, params).await
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Background task that owns the WebSocket connection.
async fn connection_task(
    url: String,
    ws: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    shared: Arc<Shared>,
) {
    let (mut sink, mut stream) = ws.split();

    let reason = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(WsCommand::Send { frame, done }) => {
                        let result = sink
                            .send(Message::Text(frame.into()))
                            .await
                            .map_err(|e| TransportError::WebSocket(e.to_string()));
                        let _ = done.send(result);
                    }
                    Some(WsCommand::Close { done }) => {
                        let result = sink
                            .close()
                            .await
                            .map_err(|e| TransportError::WebSocket(e.to_string()));
                        if let Some(done) = done {
                            let _ = done.send(result);
                        }
                        tracing::info!(url = %url, "WebSocket closed");
                        return;
                    }
                    None => {
                        let _ = sink.close().await;
                        return;
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => dispatch(&shared, text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break "connection closed by peer".to_string(),
                    Some(Err(e)) => break e.to_string(),
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    let dropped = shared.registry().teardown();
    if shared.finish(ConnectionState::Failed(reason.clone())) {
        tracing::warn!(url = %url, error = %reason, dropped, "WebSocket read loop stopped");
    }
}

fn dispatch(shared: &Shared, text: &str) {
    let resp = match serde_json::from_str::<JsonRpcResponse>(text) {
        Ok(resp) => resp,
        Err(e) => {
            tracing::debug!(error = %e, "dropping unparseable frame");
            return;
        }
    };
    let id = resp.id;
    if shared.registry().dispatch(resp) == Dispatch::Unknown {
        tracing::debug!(id = ?id, "dropping frame for unknown id");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builders() {
        let config = WsClientConfig::default()
            .with_call_timeout(Duration::ZERO)
            .with_header("Authorization", "Bearer x");
        assert!(config.call_timeout.is_zero());
        assert_eq!(config.headers.len(), 1);
        assert_eq!(WsClientConfig::default().call_timeout, Duration::from_secs(3));
    }

    #[test]
    fn sub_millisecond_timeouts_stay_nonzero() {
        assert_eq!(as_nanos(Duration::from_micros(500)), 500_000);
        assert_eq!(as_nanos(Duration::ZERO), 0);
        assert_eq!(as_nanos(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn dial_rejects_invalid_url() {
        let err = WsClient::dial_default("not a url").await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)), "{err:?}");
    }

    #[tokio::test]
    async fn dial_failure_is_transport_error() {
        // Port 1 on loopback: nothing listens there.
        let err = WsClient::dial_default("ws://127.0.0.1:1").await.unwrap_err();
        assert!(err.is_transport_error(), "{err:?}");
    }
}
