//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name                  | Description                                   | Key Methods          |
// |-----------------------|-----------------------------------------------|----------------------|
// | Event                 | Broker event: routing type + JSON payload     | order_processing, .. |
// | OrderCreatedPayload   | Payload of order.created                      | decode               |
// | StatusPayload         | Id-bearing payload of status events           | order_id             |
// | OrderCompletedPayload | Payload of order.completed                    |                      |
// | OrderFailedPayload    | Payload of order.failed                       |                      |
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::order::CartItem;

/// Routing key / event type for newly published orders
pub const ORDER_CREATED: &str = "order.created";
/// Routing key / event type emitted once stock is deducted
pub const ORDER_PROCESSING: &str = "order.processing";
/// Routing key / event type emitted after successful payment
pub const ORDER_COMPLETED: &str = "order.completed";
/// Routing key / event type emitted on a permanent processing failure
pub const ORDER_FAILED: &str = "order.failed";

/// Domain event as carried on the wire
///
/// `event_type` doubles as the broker routing key and as the discriminant for
/// the payload shape; the payload itself stays opaque JSON until a consumer
/// decodes it per-type. Events are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
}

impl Event {
    /// Builds an `order.processing` event for the given order
    pub fn order_processing(order_id: &str) -> Self {
        Self {
            event_type: ORDER_PROCESSING.to_string(),
            payload: json!({ "id": order_id }),
        }
    }

    /// Builds an `order.completed` event carrying the paid amount
    pub fn order_completed(order_id: &str, amount: Decimal) -> Self {
        Self {
            event_type: ORDER_COMPLETED.to_string(),
            payload: json!({
                "id": order_id,
                "order_id": order_id,
                "amount": amount,
                "processed_at": Utc::now(),
            }),
        }
    }

    /// Builds an `order.failed` event with the failure reason
    pub fn order_failed(order_id: &str, reason: &str) -> Self {
        Self {
            event_type: ORDER_FAILED.to_string(),
            payload: json!({
                "id": order_id,
                "order_id": order_id,
                "reason": reason,
            }),
        }
    }

    /// Decodes the payload into a typed representation
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Payload of `order.created`
#[derive(Debug, Clone, Deserialize)]
pub struct OrderCreatedPayload {
    pub id: String,
    pub items: Vec<CartItem>,
    pub total: Decimal,
}

/// Id-bearing payload shared by the status events
///
/// Producer versions drifted between `id` and `order_id`; both are accepted
/// and `order_id` takes precedence when both carry a value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
}

impl StatusPayload {
    /// Returns the order identifier, preferring `order_id` over `id`
    pub fn order_id(&self) -> Option<&str> {
        self.order_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| self.id.as_deref().filter(|id| !id.is_empty()))
    }
}

/// Payload of `order.completed`
#[derive(Debug, Clone, Deserialize)]
pub struct OrderCompletedPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    pub amount: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// Payload of `order.failed`
#[derive(Debug, Clone, Deserialize)]
pub struct OrderFailedPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}
