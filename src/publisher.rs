//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name                  | Description                                    | Key Methods         |
// |-----------------------|------------------------------------------------|---------------------|
// | PublishError          | Serialization or transport publish failure     |                     |
// | EventPublisher        | Capability to publish domain events            | publish             |
// | RabbitEventPublisher  | Topic-exchange publisher over rabbitmq crate   | connect, close      |
//--------------------------------------------------------------------------------------------------

use async_trait::async_trait;
use rabbitmq::{Publisher, RabbitMQError};
use thiserror::Error;
use tracing::info;

use crate::domain::Event;

/// Failure to publish a domain event
#[derive(Debug, Error)]
pub enum PublishError {
    /// The event could not be serialized to JSON
    #[error("serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The broker rejected the publish (after the transport's single retry)
    #[error(transparent)]
    Transport(#[from] RabbitMQError),
}

/// Capability to publish domain events to the order topic exchange
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes the event, routed by its `event_type`
    async fn publish(&self, evt: Event) -> Result<(), PublishError>;
}

/// Publisher backed by the `rabbitmq` transport crate
///
/// Serializes events as `{ "type": ..., "payload": ... }` and publishes them
/// with the event type as routing key. Reconnect-and-retry on a failed
/// publish and the idempotent close are handled by the transport.
pub struct RabbitEventPublisher {
    inner: Publisher,
    exchange: String,
}

impl RabbitEventPublisher {
    /// Connects to the broker and declares the topic exchange
    pub async fn connect(url: &str, exchange: &str) -> Result<Self, RabbitMQError> {
        let inner = Publisher::connect(url, exchange).await?;
        Ok(Self {
            inner,
            exchange: exchange.to_string(),
        })
    }

    /// Closes the underlying publisher; safe to call more than once
    pub async fn close(&self) -> Result<(), RabbitMQError> {
        self.inner.close().await
    }
}

#[async_trait]
impl EventPublisher for RabbitEventPublisher {
    async fn publish(&self, evt: Event) -> Result<(), PublishError> {
        let body = serde_json::to_vec(&evt)?;
        self.inner.publish(&evt.event_type, &body).await?;
        info!(
            exchange = %self.exchange,
            routing_key = %evt.event_type,
            body_size = body.len(),
            "event published"
        );
        Ok(())
    }
}
