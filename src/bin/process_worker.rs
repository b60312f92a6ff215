//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Entry point for the order processing worker.
// Consumes order.created events, deducts stock through the product service,
// and publishes the follow-up processing/completed/failed events.
//--------------------------------------------------------------------------------------------------

use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rabbitmq::Subscription;
use velure_order_pipeline::{
    Config, EventConsumer, HttpInventoryClient, OrderProcessor, RabbitEventPublisher,
    ORDER_CREATED,
};

const CREATED_ORDERS_QUEUE: &str = "order_created_queue";
const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let publisher = Arc::new(connect_publisher(&config).await?);
    let inventory = Arc::new(HttpInventoryClient::new(&config.product_service_url));
    let processor = Arc::new(OrderProcessor::new(publisher.clone(), inventory));

    let subscription = connect_subscription(&config).await?;
    info!(
        queue = subscription.queue_name(),
        workers = config.workers,
        "process worker ready"
    );

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let consumer = EventConsumer::new(processor, config.workers);
    consumer.start(subscription, token).await?;

    if let Err(err) = publisher.close().await {
        warn!(error = %err, "publisher close failed");
    }
    info!("process worker stopped");
    Ok(())
}

/// Connects the event publisher, retrying with a linear delay
async fn connect_publisher(config: &Config) -> anyhow::Result<RabbitEventPublisher> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        match RabbitEventPublisher::connect(&config.rabbit_url, &config.exchange).await {
            Ok(publisher) => return Ok(publisher),
            Err(err) if attempt < CONNECT_ATTEMPTS => {
                error!(attempt, error = %err, "publisher connect failed, retrying");
                tokio::time::sleep(CONNECT_RETRY_DELAY * attempt).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
    unreachable!("the loop either returns or errors on the last attempt")
}

/// Binds the created-orders queue, retrying with a linear delay
async fn connect_subscription(config: &Config) -> anyhow::Result<Subscription> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        let bound = async {
            let conn = rabbitmq::connect(&config.rabbit_url).await?;
            Subscription::bind(
                &conn,
                &config.exchange,
                CREATED_ORDERS_QUEUE,
                &[ORDER_CREATED],
                config.prefetch,
            )
            .await
        }
        .await;

        match bound {
            Ok(subscription) => return Ok(subscription),
            Err(err) if attempt < CONNECT_ATTEMPTS => {
                error!(attempt, error = %err, "subscription connect failed, retrying");
                tokio::time::sleep(CONNECT_RETRY_DELAY * attempt).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
    unreachable!("the loop either returns or errors on the last attempt")
}
