//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name         | Description                                            | Key Methods           |
// |--------------|--------------------------------------------------------|-----------------------|
// | SseRegistry  | Per-order fan-out of status updates to SSE streams     | register, broadcast   |
// | OrderUpdates | One subscriber's update feed, unregisters on drop      | recv                  |
//--------------------------------------------------------------------------------------------------

mod handler;

pub use handler::{
    router, ApiError, AppState, StaticTokenAuthenticator, TokenAuthenticator, KEEP_ALIVE_INTERVAL,
};

use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::Order;

/// Per-subscriber buffer; a subscriber this far behind starts losing updates
pub const SUBSCRIBER_BUFFER: usize = 10;

/// Fan-out point between the status propagator and the SSE streams
///
/// One entry per order id, each holding the senders of the currently
/// connected subscribers. The map lives behind a `parking_lot::Mutex` and is
/// never exposed; all mutation goes through `register`/`broadcast` and the
/// `OrderUpdates` drop guard. Broadcasting never blocks: a slow subscriber
/// loses the update, everyone else still gets it.
#[derive(Default)]
pub struct SseRegistry {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<Order>>>>,
}

impl SseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to updates for one order
    ///
    /// The subscription lasts as long as the returned handle; dropping it
    /// (e.g. when the HTTP client disconnects) removes the sender from the
    /// registry.
    pub fn register(self: &Arc<Self>, order_id: &str) -> OrderUpdates {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers
            .lock()
            .entry(order_id.to_string())
            .or_default()
            .push(tx.clone());
        debug!(order_id, "sse subscriber registered");
        OrderUpdates {
            rx,
            tx,
            order_id: order_id.to_string(),
            registry: Arc::clone(self),
        }
    }

    /// Pushes an updated order to every subscriber of that order
    ///
    /// Non-blocking by design: a subscriber whose buffer is full has the
    /// update dropped (it will catch up on the next one), a disconnected
    /// subscriber is pruned on the spot.
    pub fn broadcast(&self, order_id: &str, order: &Order) {
        let mut subscribers = self.subscribers.lock();
        let Some(senders) = subscribers.get_mut(order_id) else {
            return;
        };

        senders.retain(|tx| match tx.try_send(order.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(order_id, "sse subscriber buffer full, dropping update");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(order_id, "pruning disconnected sse subscriber");
                false
            }
        });

        if senders.is_empty() {
            subscribers.remove(order_id);
        }
    }

    /// Number of live subscribers for an order
    pub fn subscriber_count(&self, order_id: &str) -> usize {
        self.subscribers
            .lock()
            .get(order_id)
            .map_or(0, |senders| senders.len())
    }

    fn unregister(&self, order_id: &str, tx: &mpsc::Sender<Order>) {
        let mut subscribers = self.subscribers.lock();
        if let Some(senders) = subscribers.get_mut(order_id) {
            senders.retain(|candidate| !candidate.same_channel(tx));
            if senders.is_empty() {
                subscribers.remove(order_id);
            }
        }
        debug!(order_id, "sse subscriber unregistered");
    }
}

/// One subscriber's feed of order updates
///
/// Holds its sender half purely as the identity used to remove itself from
/// the registry when dropped.
pub struct OrderUpdates {
    rx: mpsc::Receiver<Order>,
    tx: mpsc::Sender<Order>,
    order_id: String,
    registry: Arc<SseRegistry>,
}

impl OrderUpdates {
    /// Waits for the next update; None once the registry side is gone
    pub async fn recv(&mut self) -> Option<Order> {
        self.rx.recv().await
    }

    /// Non-blocking poll, used by tests
    pub fn try_recv(&mut self) -> Result<Order, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}

impl Drop for OrderUpdates {
    fn drop(&mut self) {
        self.registry.unregister(&self.order_id, &self.tx);
    }
}
