//! Event registry: deduplicated server-pushed notifications.
//!
//! Subscriptions are keyed by [`EventDescriptor::hash`]. The first listener
//! for a descriptor sends `subscribe`; later listeners get a handle to the
//! same channel and cost nothing on the wire.
//!
//! # Delivery contract
//! A descriptor has exactly one queue. Every clone of its [`EventReceiver`]
//! reads from that queue, so each notification reaches exactly one reader.
//! This is competing-consumer delivery, not broadcast: two callbacks
//! registered for the same descriptor split the notifications between them.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use duplexrpc_core::error::TransportError;
use duplexrpc_core::event::EventDescriptor;
use duplexrpc_core::request::{JsonRpcRequest, JsonRpcResponse};

use crate::client::WsClient;
use crate::registry::{Slot, Subscription};

/// Reserved meta-method opening a subscription.
pub const SUBSCRIBE: &str = "subscribe";
/// Reserved meta-method closing a subscription.
pub const UNSUBSCRIBE: &str = "unsubscribe";

/// Shared handle to one descriptor's notification queue.
///
/// `recv` returns `None` once the subscription is closed (by
/// [`WsClient::close_event`], [`WsClient::close`] or a connection failure)
/// and any buffered notifications have been drained.
#[derive(Clone)]
pub struct EventReceiver {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<JsonRpcResponse>>>,
}

impl EventReceiver {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<JsonRpcResponse>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }

    /// Wait for the next notification.
    pub async fn recv(&self) -> Option<JsonRpcResponse> {
        self.rx.lock().await.recv().await
    }

    /// Returns `true` if both handles read from the same queue.
    pub fn same_channel(&self, other: &EventReceiver) -> bool {
        Arc::ptr_eq(&self.rx, &other.rx)
    }
}

impl std::fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReceiver").finish_non_exhaustive()
    }
}

impl WsClient {
    /// Start (or join) the subscription for `event`.
    ///
    /// Joining a live subscription never waits. Concurrent first listeners of
    /// one descriptor queue behind a per-descriptor lock, so only one
    /// `subscribe` is sent; other descriptors are not affected.
    ///
    /// A protocol error from `subscribe` is returned and nothing is registered.
    pub async fn listen_event(
        &self,
        event: &EventDescriptor,
    ) -> Result<EventReceiver, TransportError> {
        let hash = event.hash();
        if let Some(receiver) = self.joined(event) {
            return Ok(receiver);
        }

        let gate = self.registry().gate(hash);
        let _gate = gate.lock().await;
        if let Some(receiver) = self.joined(event) {
            return Ok(receiver);
        }

        let id = self.next_id();
        let frame = JsonRpcRequest::new(id, SUBSCRIBE, Some(event.notify_params()?)).to_frame()?;
        let (events, receiver) = EventReceiver::channel();
        let (ack, ack_rx) = oneshot::channel();

        let resp = self
            .round_trip(id, frame, Slot::Subscribe { ack, events }, ack_rx)
            .await?;
        if let Some(err) = resp.error {
            return Err(TransportError::Rpc(err));
        }

        self.registry().insert_subscription(
            hash,
            Subscription {
                id,
                receiver: receiver.clone(),
            },
        )?;
        tracing::debug!(event = %event, hash, id, "subscribed");
        Ok(receiver)
    }

    /// Listen for `event` and run `on_event` for every notification on a
    /// spawned task, until the subscription closes.
    ///
    /// Callbacks sharing a descriptor compete for notifications; see the
    /// module docs.
    pub async fn listen_event_fn<F>(
        &self,
        event: &EventDescriptor,
        mut on_event: F,
    ) -> Result<JoinHandle<()>, TransportError>
    where
        F: FnMut(JsonRpcResponse) + Send + 'static,
    {
        let receiver = self.listen_event(event).await?;
        Ok(tokio::spawn(async move {
            while let Some(resp) = receiver.recv().await {
                on_event(resp);
            }
        }))
    }

    /// Unsubscribe from `event` and close its channel.
    ///
    /// A no-op when `event` was never listened to. If `unsubscribe` fails,
    /// the subscription stays registered and the error is returned.
    pub async fn close_event(&self, event: &EventDescriptor) -> Result<(), TransportError> {
        let hash = event.hash();
        if !self.is_listening(hash) {
            return Ok(());
        }

        let gate = self.registry().gate(hash);
        let _gate = gate.lock().await;
        if !self.is_listening(hash) {
            return Ok(());
        }

        let resp = self
            .call_raw(UNSUBSCRIBE, Some(event.notify_params()?))
            .await?;
        if let Some(err) = resp.error {
            return Err(TransportError::Rpc(err));
        }

        self.registry().remove_subscription(hash);
        tracing::debug!(event = %event, hash, "unsubscribed");
        Ok(())
    }

    fn joined(&self, event: &EventDescriptor) -> Option<EventReceiver> {
        let hash = event.hash();
        let receiver = self.registry().subscription(hash).map(|s| s.receiver.clone())?;
        tracing::debug!(event = %event, hash, "joining existing subscription");
        Some(receiver)
    }

    fn is_listening(&self, hash: u64) -> bool {
        self.registry().subscription(hash).is_some()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.registry().subscription_len()
    }
}
