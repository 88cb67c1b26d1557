//! Pending-call table and event-subscription table of one connection.
//!
//! Both maps live behind the connection's single mutex; every method here is
//! an O(1) critical section and never awaits.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

use duplexrpc_core::error::TransportError;
use duplexrpc_core::request::{JsonRpcResponse, RequestId};

use crate::events::EventReceiver;

/// Where a response for a given id goes.
pub(crate) enum Slot {
    /// One-shot call: removed on first delivery.
    Call(oneshot::Sender<JsonRpcResponse>),
    /// In-flight `subscribe`: the first response is the acknowledgement; on
    /// success the slot turns into [`Slot::Event`] in the same critical section.
    Subscribe {
        ack: oneshot::Sender<JsonRpcResponse>,
        events: mpsc::UnboundedSender<JsonRpcResponse>,
    },
    /// Live subscription: stays until unsubscribed or torn down.
    Event(mpsc::UnboundedSender<JsonRpcResponse>),
}

/// One live server-side subscription.
pub(crate) struct Subscription {
    pub id: RequestId,
    pub receiver: EventReceiver,
}

/// Outcome of routing one inbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Call,
    Subscribed,
    Event,
    Unknown,
}

#[derive(Default)]
pub(crate) struct Registry {
    pending: HashMap<RequestId, Slot>,
    events: HashMap<u64, Subscription>,
    gates: HashMap<u64, Weak<AsyncMutex<()>>>,
    closed: bool,
}

impl Registry {
    pub fn register(&mut self, id: RequestId, slot: Slot) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        if self.pending.contains_key(&id) {
            return Err(TransportError::WebSocket(format!(
                "request id {id} already in flight"
            )));
        }
        self.pending.insert(id, slot);
        Ok(())
    }

    /// Route `resp` to whoever waits on its id.
    pub fn dispatch(&mut self, resp: JsonRpcResponse) -> Dispatch {
        let Some(id) = resp.id else {
            return Dispatch::Unknown;
        };
        match self.pending.remove(&id) {
            None => Dispatch::Unknown,
            Some(Slot::Call(tx)) => {
                let _ = tx.send(resp);
                Dispatch::Call
            }
            Some(Slot::Subscribe { ack, events }) => {
                let accepted = resp.error.is_none();
                if ack.send(resp).is_ok() && accepted {
                    self.pending.insert(id, Slot::Event(events));
                }
                Dispatch::Subscribed
            }
            Some(Slot::Event(tx)) => {
                let _ = tx.send(resp);
                self.pending.insert(id, Slot::Event(tx));
                Dispatch::Event
            }
        }
    }

    /// Drop the waiter for a call that gave up. Live event slots are left
    /// alone. Returns `false` if there was nothing to drop.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        match self.pending.get(&id) {
            None | Some(Slot::Event(_)) => false,
            Some(_) => {
                self.pending.remove(&id);
                true
            }
        }
    }

    /// Remove whatever waits on `id`, whatever its kind. Used when the call
    /// that registered it is gone.
    pub fn abandon(&mut self, id: RequestId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Lock serializing `subscribe`/`unsubscribe` for one descriptor hash.
    /// Entries die with their last holder.
    pub fn gate(&mut self, hash: u64) -> Arc<AsyncMutex<()>> {
        self.gates.retain(|_, gate| gate.strong_count() > 0);
        if let Some(gate) = self.gates.get(&hash).and_then(Weak::upgrade) {
            return gate;
        }
        let gate = Arc::new(AsyncMutex::new(()));
        self.gates.insert(hash, Arc::downgrade(&gate));
        gate
    }

    pub fn subscription(&self, hash: u64) -> Option<&Subscription> {
        self.events.get(&hash)
    }

    pub fn insert_subscription(
        &mut self,
        hash: u64,
        sub: Subscription,
    ) -> Result<(), TransportError> {
        if self.closed || !matches!(self.pending.get(&sub.id), Some(Slot::Event(_))) {
            return Err(TransportError::ConnectionClosed);
        }
        self.events.insert(hash, sub);
        Ok(())
    }

    /// Forget a subscription and close its channel.
    pub fn remove_subscription(&mut self, hash: u64) -> Option<Subscription> {
        let sub = self.events.remove(&hash)?;
        self.pending.remove(&sub.id);
        Some(sub)
    }

    /// Close every pending channel and subscription. Further registrations fail.
    pub fn teardown(&mut self) -> usize {
        self.closed = true;
        let dropped = self.pending.len();
        self.pending.clear();
        self.events.clear();
        dropped
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn subscription_len(&self) -> usize {
        self.events.len()
    }
}
