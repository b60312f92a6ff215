//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Entry point for the status gateway.
// Consumes order.processing / order.completed events, applies them to the
// order store, and streams live status updates to browsers over SSE.
//--------------------------------------------------------------------------------------------------

use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rabbitmq::Subscription;
use velure_order_pipeline::{
    sse::AppState, Config, EventConsumer, InMemoryOrderStore, SseRegistry,
    StaticTokenAuthenticator, StatusPropagator, ORDER_COMPLETED, ORDER_FAILED, ORDER_PROCESSING,
};

const STATUS_QUEUE: &str = "order_status_queue";
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

    let store = Arc::new(InMemoryOrderStore::new());
    let registry = Arc::new(SseRegistry::new());
    let propagator = Arc::new(StatusPropagator::new(store.clone(), registry.clone()));

    let mut authenticator = StaticTokenAuthenticator::new();
    if let (Some(token), Some(user_id)) = (&config.auth_token, &config.auth_user_id) {
        authenticator = authenticator.with_token(token, user_id);
    }

    let state = Arc::new(AppState {
        store,
        registry,
        authenticator: Arc::new(authenticator),
    });
    let app = velure_order_pipeline::sse::router(state);

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let subscription = connect_subscription(&config).await?;
    info!(
        queue = subscription.queue_name(),
        workers = config.workers,
        "status consumer ready"
    );

    let consumer_token = token.clone();
    let consumer_task = tokio::spawn(async move {
        let consumer = EventConsumer::new(propagator, config.workers);
        consumer.start(subscription, consumer_token).await
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "status gateway listening");

    let server_token = token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_token.cancelled().await })
        .await?;

    consumer_task.await??;
    info!("status gateway stopped");
    Ok(())
}

/// Binds the status queue, retrying with a linear delay
async fn connect_subscription(config: &Config) -> anyhow::Result<Subscription> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        let bound = async {
            let conn = rabbitmq::connect(&config.rabbit_url).await?;
            Subscription::bind(
                &conn,
                &config.exchange,
                STATUS_QUEUE,
                &[ORDER_PROCESSING, ORDER_COMPLETED, ORDER_FAILED],
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
