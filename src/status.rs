//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name             | Description                                        | Key Methods          |
// |------------------|----------------------------------------------------|----------------------|
// | StatusError      | Status propagation failure                         |                      |
// | StatusPropagator | Applies status events to the store + SSE fan-out   | apply                |
//--------------------------------------------------------------------------------------------------

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::{
    consumer::{EventHandler, HandlerError},
    domain::{Event, OrderStatus, StatusPayload, ORDER_COMPLETED, ORDER_FAILED, ORDER_PROCESSING},
    sse::SseRegistry,
    store::{OrderStore, StoreError},
};

/// Status propagation failure
///
/// Only store failures reach the consumer as retryable errors; malformed
/// payloads are surfaced as [`HandlerError::Malformed`] and unknown orders
/// are logged and acked.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Consumer-side step that turns status events into order mutations
///
/// Listens on `order.processing`, `order.completed` and `order.failed`;
/// every other event type is an acknowledged no-op. A matched event maps to
/// a target status, which is applied through the store's atomic forward-only
/// transition and then fanned out to SSE subscribers. Redelivered
/// duplicates, out-of-order arrivals and concurrent workers therefore never
/// regress an order's status.
pub struct StatusPropagator {
    store: Arc<dyn OrderStore>,
    registry: Arc<SseRegistry>,
}

impl StatusPropagator {
    pub fn new(store: Arc<dyn OrderStore>, registry: Arc<SseRegistry>) -> Self {
        Self { store, registry }
    }

    /// Applies one status to one order and broadcasts the updated order
    ///
    /// The check-and-set runs inside [`OrderStore::advance_status`], under
    /// the store's own concurrency control; two workers racing on the same
    /// order cannot interleave a stale write. Unknown orders (deleted out of
    /// band) and non-advancing transitions persist nothing and broadcast
    /// nothing.
    pub async fn apply(&self, order_id: &str, status: OrderStatus) -> Result<(), StatusError> {
        match self.store.advance_status(order_id, status).await? {
            Some(order) => {
                info!(order_id, status = ?order.status, "order status advanced");
                self.registry.broadcast(order_id, &order);
            }
            None => {
                info!(
                    order_id,
                    requested = ?status,
                    "status event ignored, order unknown or transition not an advance"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for StatusPropagator {
    async fn handle(&self, evt: Event) -> Result<(), HandlerError> {
        let status = match evt.event_type.as_str() {
            ORDER_PROCESSING => OrderStatus::Processing,
            ORDER_COMPLETED => OrderStatus::Completed,
            ORDER_FAILED => OrderStatus::Failed,
            _ => return Ok(()),
        };

        let payload: StatusPayload = evt.decode_payload().map_err(|err| {
            HandlerError::Malformed(format!("{} payload: {}", evt.event_type, err))
        })?;

        let Some(order_id) = payload.order_id() else {
            return Err(HandlerError::Malformed(format!(
                "{} payload carries no order id",
                evt.event_type
            )));
        };

        self.apply(order_id, status)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(())
    }
}
