//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name               | Description                                      | Key Methods            |
// |--------------------|--------------------------------------------------|------------------------|
// | StoreError         | Order store failure                              |                        |
// | OrderStore         | Capability to load and persist orders            | save, find             |
// | InMemoryOrderStore | parking_lot-guarded map of orders                | insert                 |
//--------------------------------------------------------------------------------------------------

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::{Order, OrderStatus};

/// Order store failure
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not serve the request
    #[error("order store unavailable: {0}")]
    Unavailable(String),
}

/// Capability to load and persist orders
///
/// The canonical store lives in another service; this pipeline only needs
/// lookup and status persistence, so the trait stays narrow.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists the order, replacing any previous version under the same id
    async fn save(&self, order: Order) -> Result<(), StoreError>;
    /// Looks up an order by id
    async fn find(&self, order_id: &str) -> Result<Option<Order>, StoreError>;
    /// Lists all orders placed by a user
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>, StoreError>;
    /// Atomically applies a forward status transition to the stored order
    ///
    /// The read-check-write must happen under the store's own concurrency
    /// control so that concurrent writers cannot interleave and regress a
    /// status. Returns the updated order when the transition advanced the
    /// lifecycle, None when the order is unknown or the transition would
    /// not advance it.
    async fn advance_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError>;
}

/// In-memory order store
///
/// Backs the status gateway and the test suites. Nothing survives restart.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an order, e.g. when mirroring an `order.created` event
    pub fn insert(&self, order: Order) {
        self.orders.lock().insert(order.id.clone(), order);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn save(&self, order: Order) -> Result<(), StoreError> {
        self.orders.lock().insert(order.id.clone(), order);
        Ok(())
    }

    async fn find(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.lock().get(order_id).cloned())
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .orders
            .lock()
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn advance_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError> {
        // Check and write under one lock acquisition; there is no await
        // point between them.
        let mut orders = self.orders.lock();
        let Some(order) = orders.get_mut(order_id) else {
            return Ok(None);
        };
        if !order.advance_to(status) {
            return Ok(None);
        }
        Ok(Some(order.clone()))
    }
}
