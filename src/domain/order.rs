//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name           | Description                                      | Key Methods           |
// |----------------|--------------------------------------------------|-----------------------|
// | OrderStatus    | Forward-only order lifecycle status              | can_advance_to, rank  |
// | CartItem       | Single line item of an order                     |                       |
// | Order          | Order aggregate propagated to SSE clients        | advance_to            |
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an order
///
/// Transitions are monotonic forward: `Created -> Processing -> {Completed | Failed}`.
/// Nothing ever moves a status backward; re-applying the current status is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    Processing,
    Completed,
    Failed,
}

impl OrderStatus {
    /// Position in the forward-only lifecycle; terminal states share the top rank
    fn rank(self) -> u8 {
        match self {
            OrderStatus::Created => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Completed | OrderStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition
    ///
    /// Re-applying the current status is not an advance (idempotent redelivery
    /// of a status event must be a no-op), and a terminal status is never
    /// overwritten.
    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        next.rank() > self.rank()
    }
}

/// Single line item of an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    /// Identifier of the product in the catalog service
    pub product_id: String,
    /// Display name, carried for order history rendering
    pub name: String,
    /// Number of units ordered; must be > 0 upstream of this pipeline
    pub quantity: u32,
    /// Unit price at the time the order was placed
    pub price: Decimal,
}

/// Order aggregate
///
/// Created by the order-publication flow; within this pipeline it is mutated
/// exclusively by the status propagator in response to broker events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier (UUID string)
    pub id: String,
    /// Identifier of the user who placed the order
    pub user_id: String,
    /// Line items
    pub items: Vec<CartItem>,
    /// Order total
    pub total: Decimal,
    /// Current lifecycle status
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Applies a forward status transition, bumping `updated_at`
    ///
    /// Returns false (and leaves the order untouched) when the transition
    /// would not advance the lifecycle - the caller should treat that as an
    /// acknowledged no-op, not an error.
    pub fn advance_to(&mut self, status: OrderStatus) -> bool {
        if !self.status.can_advance_to(status) {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }
}
