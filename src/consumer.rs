//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name           | Description                                          | Key Methods         |
// |----------------|------------------------------------------------------|---------------------|
// | HandlerError   | Handler failure selecting the settlement path        |                     |
// | EventHandler   | Business handler invoked per decoded event           | handle              |
// | EventConsumer  | Worker pool draining one delivery stream             | start               |
// | ConsumerError  | Consumer lifecycle failure                           |                     |
//--------------------------------------------------------------------------------------------------

use async_trait::async_trait;
use rabbitmq::{DeliveryEnvelope, DeliveryStream};
use std::sync::Arc;
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::Event;

/// Failure returned by an [`EventHandler`]
///
/// The variant picks the settlement path: `Malformed` deliveries are
/// rejected (dead-letterable, never retried), everything else is nacked
/// with requeue.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload can never be processed, no matter how often it is
    /// redelivered
    #[error("malformed event: {0}")]
    Malformed(String),
    /// Any other failure; the broker redelivers
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Business handler invoked once per decoded event
///
/// A returned [`HandlerError::Other`] means the delivery is nacked with
/// requeue - the handler must therefore be idempotent under at-least-once
/// redelivery. [`HandlerError::Malformed`] sends the delivery down the
/// poison path instead. Events the handler does not care about should
/// return Ok so they are acknowledged as no-ops.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, evt: Event) -> Result<(), HandlerError>;
}

/// Consumer lifecycle failure
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// A worker task panicked or was aborted
    #[error("consumer worker failed: {0}")]
    Worker(String),
}

/// Worker pool draining a single delivery stream
///
/// Each of the `workers` tasks pulls deliveries from the shared stream and
/// processes them end-to-end (decode, handler, settle); no delivery is ever
/// shared across workers and no ordering is guaranteed between them.
///
/// Per-delivery settlement policy:
/// - undecodable body or [`HandlerError::Malformed`]: reject (malformed
///   messages are never retried)
/// - any other handler error: nack with requeue (the broker redelivers)
/// - handler ok: ack
pub struct EventConsumer {
    handler: Arc<dyn EventHandler>,
    workers: usize,
}

impl EventConsumer {
    /// Creates a consumer with the given handler and worker count
    pub fn new(handler: Arc<dyn EventHandler>, workers: usize) -> Self {
        Self {
            handler,
            workers: workers.max(1),
        }
    }

    /// Runs the worker pool until the token is cancelled
    ///
    /// Blocks until cancellation has been observed by every worker and all of
    /// them have returned, then resolves to Ok(()). The stream closing early
    /// also stops the workers that observe it.
    pub async fn start<S>(
        &self,
        source: S,
        token: CancellationToken,
    ) -> Result<(), ConsumerError>
    where
        S: DeliveryStream + 'static,
    {
        let source = Arc::new(Mutex::new(source));
        let mut tasks = JoinSet::new();

        info!(workers = self.workers, "event consumer started");

        for worker_id in 0..self.workers {
            let source = Arc::clone(&source);
            let handler = Arc::clone(&self.handler);
            let token = token.clone();
            tasks.spawn(async move {
                worker_loop(worker_id, source, handler, token).await;
            });
        }

        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "consumer worker join failed");
                failure.get_or_insert_with(|| ConsumerError::Worker(err.to_string()));
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn worker_loop<S>(
    worker_id: usize,
    source: Arc<Mutex<S>>,
    handler: Arc<dyn EventHandler>,
    token: CancellationToken,
) where
    S: DeliveryStream,
{
    info!(worker_id, "consumer worker started");

    loop {
        let envelope = tokio::select! {
            _ = token.cancelled() => {
                info!(worker_id, "consumer worker stopped");
                return;
            }
            delivery = async { source.lock().await.next_delivery().await } => {
                match delivery {
                    Some(envelope) => envelope,
                    None => {
                        warn!(worker_id, "delivery stream closed");
                        return;
                    }
                }
            }
        };

        process_delivery(worker_id, envelope, handler.as_ref()).await;
    }
}

async fn process_delivery(worker_id: usize, envelope: DeliveryEnvelope, handler: &dyn EventHandler) {
    let evt: Event = match serde_json::from_slice(&envelope.body) {
        Ok(evt) => evt,
        Err(err) => {
            error!(
                worker_id,
                routing_key = %envelope.routing_key,
                error = %err,
                "invalid event body, rejecting"
            );
            if let Err(settle_err) = envelope.reject().await {
                warn!(worker_id, error = %settle_err, "reject failed");
            }
            return;
        }
    };

    let event_type = evt.event_type.clone();
    match handler.handle(evt).await {
        Ok(()) => {
            if let Err(settle_err) = envelope.ack().await {
                warn!(worker_id, event_type, error = %settle_err, "ack failed");
            }
        }
        Err(HandlerError::Malformed(reason)) => {
            error!(
                worker_id,
                event_type,
                reason,
                "unprocessable event, rejecting"
            );
            if let Err(settle_err) = envelope.reject().await {
                warn!(worker_id, event_type, error = %settle_err, "reject failed");
            }
        }
        Err(err) => {
            error!(
                worker_id,
                event_type,
                error = %err,
                "handler failed, requeueing"
            );
            if let Err(settle_err) = envelope.nack(true).await {
                warn!(worker_id, event_type, error = %settle_err, "nack failed");
            }
        }
    }
}
