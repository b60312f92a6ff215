// Expose the modules
pub mod config;
pub mod consumer;
pub mod domain;
pub mod inventory;
pub mod processing;
pub mod publisher;
pub mod sse;
pub mod status;
pub mod store;

// Re-export key types for easier usage
pub use config::Config;
pub use consumer::{ConsumerError, EventConsumer, EventHandler, HandlerError};
pub use domain::{
    CartItem, Event, Order, OrderStatus, ORDER_COMPLETED, ORDER_CREATED, ORDER_FAILED,
    ORDER_PROCESSING,
};
pub use inventory::{HttpInventoryClient, InventoryClient, InventoryError};
pub use processing::{OrderProcessor, ProcessingError};
pub use publisher::{EventPublisher, PublishError, RabbitEventPublisher};
pub use sse::{SseRegistry, StaticTokenAuthenticator, TokenAuthenticator};
pub use status::StatusPropagator;
pub use store::{InMemoryOrderStore, OrderStore, StoreError};
