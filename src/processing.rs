//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name             | Description                                        | Key Methods         |
// |------------------|----------------------------------------------------|---------------------|
// | ProcessingError  | Failure while processing a created order           |                     |
// | OrderProcessor   | Stock deduction + simulated payment + events       | process             |
//--------------------------------------------------------------------------------------------------

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    consumer::{EventHandler, HandlerError},
    domain::{CartItem, Event, OrderCreatedPayload, ORDER_CREATED},
    inventory::{InventoryClient, InventoryError},
    publisher::{EventPublisher, PublishError},
};

/// Default upper bound for the simulated payment latency
pub const DEFAULT_MAX_PAYMENT_DELAY: Duration = Duration::from_secs(3);

/// Failure while processing a created order
///
/// Any of these variants reaching the consumer means the delivery is nacked
/// with requeue and the whole processing step runs again from scratch.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Transient (or otherwise retryable) inventory failure
    #[error("deduct stock for product {product_id}: {source}")]
    Inventory {
        product_id: String,
        source: InventoryError,
    },
    /// A required event could not be published
    #[error("publish {event_type}: {source}")]
    Publish {
        event_type: &'static str,
        source: PublishError,
    },
}

/// Producer-side business step for `order.created` events
///
/// For each order: deduct stock per line item, announce `order.processing`,
/// simulate the payment provider's latency, then announce a terminal
/// `order.completed` or - on a permanent inventory failure - `order.failed`.
///
/// The pipeline is at-least-once: any error returned here leads to
/// redelivery, so downstream status handling must be idempotent on the
/// status value, not on event count.
pub struct OrderProcessor {
    publisher: Arc<dyn EventPublisher>,
    inventory: Arc<dyn InventoryClient>,
    max_payment_delay: Duration,
}

impl OrderProcessor {
    /// Creates a processor with the default simulated payment latency
    pub fn new(publisher: Arc<dyn EventPublisher>, inventory: Arc<dyn InventoryClient>) -> Self {
        Self::with_payment_delay(publisher, inventory, DEFAULT_MAX_PAYMENT_DELAY)
    }

    /// Creates a processor with a custom upper bound on the payment latency
    pub fn with_payment_delay(
        publisher: Arc<dyn EventPublisher>,
        inventory: Arc<dyn InventoryClient>,
        max_payment_delay: Duration,
    ) -> Self {
        Self {
            publisher,
            inventory,
            max_payment_delay,
        }
    }

    /// Processes one created order end-to-end
    ///
    /// Items are deducted sequentially in list order and processing stops at
    /// the first failure. Stock already deducted for earlier items is NOT
    /// restored; see DESIGN.md for why this reference behavior is kept.
    ///
    /// Failure handling:
    /// - permanent inventory failure: exactly one `order.failed` is published
    ///   and Ok(()) is returned so the original delivery is acked (retrying a
    ///   permanently bad order cannot succeed). If that publish fails, the
    ///   publish error is returned instead so the delivery is requeued.
    /// - any other failure: returned as-is, no event published.
    pub async fn process(
        &self,
        order_id: &str,
        items: &[CartItem],
        amount: Decimal,
    ) -> Result<(), ProcessingError> {
        for item in items {
            let deducted = self
                .inventory
                .update_quantity(&item.product_id, -i64::from(item.quantity))
                .await;

            match deducted {
                Ok(()) => {}
                Err(err) if err.is_permanent() => {
                    warn!(
                        order_id,
                        product_id = %item.product_id,
                        error = %err,
                        "permanent inventory failure, emitting order.failed"
                    );
                    self.publisher
                        .publish(Event::order_failed(order_id, &err.to_string()))
                        .await
                        .map_err(|source| ProcessingError::Publish {
                            event_type: "order.failed",
                            source,
                        })?;
                    return Ok(());
                }
                Err(err) => {
                    return Err(ProcessingError::Inventory {
                        product_id: item.product_id.clone(),
                        source: err,
                    });
                }
            }
        }

        self.publisher
            .publish(Event::order_processing(order_id))
            .await
            .map_err(|source| ProcessingError::Publish {
                event_type: "order.processing",
                source,
            })?;

        self.simulate_payment().await;

        self.publisher
            .publish(Event::order_completed(order_id, amount))
            .await
            .map_err(|source| ProcessingError::Publish {
                event_type: "order.completed",
                source,
            })?;

        info!(order_id, %amount, "order processed");
        Ok(())
    }

    /// Emulates the payment provider's latency with a bounded random sleep
    async fn simulate_payment(&self) {
        let max_millis = self.max_payment_delay.as_millis() as u64;
        if max_millis == 0 {
            return;
        }
        let delay = {
            let mut rng = rand::thread_rng();
            Duration::from_millis(rng.gen_range(0..=max_millis))
        };
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl EventHandler for OrderProcessor {
    /// Handles a delivery from the created-orders queue
    ///
    /// Event types other than `order.created` are acknowledged as no-ops
    /// (the queue may be bound with a wildcard pattern). A payload that does
    /// not decode is malformed - reprocessing cannot fix it, so it goes down
    /// the reject path rather than being requeued.
    async fn handle(&self, evt: Event) -> Result<(), HandlerError> {
        if evt.event_type != ORDER_CREATED {
            return Ok(());
        }

        let payload: OrderCreatedPayload = evt
            .decode_payload()
            .map_err(|err| HandlerError::Malformed(format!("order.created payload: {err}")))?;

        self.process(&payload.id, &payload.items, payload.total)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(())
    }
}
