//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// End-to-end pipeline tests over in-memory doubles: order processing,
// status propagation, consumer settlement policy, and the SSE endpoint.
//--------------------------------------------------------------------------------------------------

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use futures::StreamExt;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use rabbitmq::{Acknowledger, DeliveryEnvelope, DeliveryStream, RabbitMQError};
use rust_decimal_macros::dec;
use serde_json::json;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use velure_order_pipeline::{
    sse::{router, AppState},
    CartItem, Event, EventConsumer, EventHandler, EventPublisher, HttpInventoryClient,
    InMemoryOrderStore, InventoryClient, InventoryError, Order, OrderProcessor, OrderStatus,
    OrderStore,
    PublishError, SseRegistry, StaticTokenAuthenticator, StatusPropagator, ORDER_COMPLETED,
    ORDER_CREATED, ORDER_FAILED, ORDER_PROCESSING,
};

//--------------------------------------------------------------------------------------------------
// Test doubles
//--------------------------------------------------------------------------------------------------

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<Event>>,
}

impl RecordingPublisher {
    fn published(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, evt: Event) -> Result<(), PublishError> {
        self.events.lock().push(evt);
        Ok(())
    }
}

/// Inventory double with a per-product script of failures; once the script
/// is exhausted every call succeeds.
#[derive(Default)]
struct ScriptedInventory {
    scripts: Mutex<HashMap<String, VecDeque<InventoryError>>>,
    calls: Mutex<Vec<(String, i64)>>,
}

impl ScriptedInventory {
    fn fail_next(&self, product_id: &str, err: InventoryError) {
        self.scripts
            .lock()
            .entry(product_id.to_string())
            .or_default()
            .push_back(err);
    }
}

#[async_trait]
impl InventoryClient for ScriptedInventory {
    async fn update_quantity(
        &self,
        product_id: &str,
        quantity_change: i64,
    ) -> Result<(), InventoryError> {
        self.calls
            .lock()
            .push((product_id.to_string(), quantity_change));
        match self
            .scripts
            .lock()
            .get_mut(product_id)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Ack,
    NackRequeue,
    Reject,
}

struct RecordingAcker {
    outcome: Arc<Mutex<Option<Settled>>>,
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(self: Box<Self>) -> Result<(), RabbitMQError> {
        *self.outcome.lock() = Some(Settled::Ack);
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), RabbitMQError> {
        *self.outcome.lock() = Some(if requeue {
            Settled::NackRequeue
        } else {
            Settled::Reject
        });
        Ok(())
    }

    async fn reject(self: Box<Self>) -> Result<(), RabbitMQError> {
        *self.outcome.lock() = Some(Settled::Reject);
        Ok(())
    }
}

fn envelope(body: &[u8], redelivered: bool) -> (DeliveryEnvelope, Arc<Mutex<Option<Settled>>>) {
    let outcome = Arc::new(Mutex::new(None));
    let env = DeliveryEnvelope::new(
        body.to_vec(),
        ORDER_CREATED.to_string(),
        redelivered,
        Box::new(RecordingAcker {
            outcome: Arc::clone(&outcome),
        }),
    );
    (env, outcome)
}

struct ChannelStream(mpsc::UnboundedReceiver<DeliveryEnvelope>);

#[async_trait]
impl DeliveryStream for ChannelStream {
    async fn next_delivery(&mut self) -> Option<DeliveryEnvelope> {
        self.0.recv().await
    }
}

//--------------------------------------------------------------------------------------------------
// Fixtures
//--------------------------------------------------------------------------------------------------

fn cart() -> Vec<CartItem> {
    vec![CartItem {
        product_id: "p1".to_string(),
        name: "Candle".to_string(),
        quantity: 2,
        price: dec!(10),
    }]
}

fn order(id: &str, user_id: &str, status: OrderStatus) -> Order {
    let now = Utc::now();
    Order {
        id: id.to_string(),
        user_id: user_id.to_string(),
        items: cart(),
        total: dec!(20),
        status,
        created_at: now,
        updated_at: now,
    }
}

fn created_event_body(order_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": ORDER_CREATED,
        "payload": {
            "id": order_id,
            "items": [{ "product_id": "p1", "name": "Candle", "quantity": 2, "price": "10" }],
            "total": "20",
        },
    }))
    .unwrap()
}

fn processor(
    publisher: Arc<RecordingPublisher>,
    inventory: Arc<ScriptedInventory>,
) -> Arc<OrderProcessor> {
    Arc::new(OrderProcessor::with_payment_delay(
        publisher,
        inventory,
        Duration::from_millis(0),
    ))
}

fn gateway(
    seed: Vec<Order>,
) -> (
    Arc<InMemoryOrderStore>,
    Arc<SseRegistry>,
    StatusPropagator,
) {
    let store = Arc::new(InMemoryOrderStore::new());
    for order in seed {
        store.insert(order);
    }
    let registry = Arc::new(SseRegistry::new());
    let propagator = StatusPropagator::new(store.clone(), registry.clone());
    (store, registry, propagator)
}

async fn run_consumer_until_settled(
    handler: Arc<dyn EventHandler>,
    envelopes: Vec<DeliveryEnvelope>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    for env in envelopes {
        tx.send(env).unwrap();
    }
    drop(tx);

    let token = CancellationToken::new();
    let stop = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.cancel();
    });

    EventConsumer::new(handler, 1)
        .start(ChannelStream(rx), token)
        .await
        .expect("consumer run");
}

//--------------------------------------------------------------------------------------------------
// Scenario A: happy path from order.created to a streamed COMPLETED status
//--------------------------------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_propagates_processing_then_completed() {
    let publisher = Arc::new(RecordingPublisher::default());
    let inventory = Arc::new(ScriptedInventory::default());
    let processor = processor(Arc::clone(&publisher), Arc::clone(&inventory));

    let (env, outcome) = envelope(&created_event_body("o1"), false);
    run_consumer_until_settled(processor, vec![env]).await;
    assert_eq!(*outcome.lock(), Some(Settled::Ack));

    assert_eq!(*inventory.calls.lock(), vec![("p1".to_string(), -2)]);
    let events = publisher.published();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, ORDER_PROCESSING);
    assert_eq!(events[1].event_type, ORDER_COMPLETED);
    assert_eq!(events[1].payload["amount"], json!("20"));

    // Feed the emitted events through the gateway side.
    let (store, registry, propagator) = gateway(vec![order("o1", "u1", OrderStatus::Created)]);
    let mut updates = registry.register("o1");
    for evt in events {
        propagator.handle(evt).await.unwrap();
    }

    assert_eq!(
        store.find("o1").await.unwrap().unwrap().status,
        OrderStatus::Completed
    );
    assert_eq!(updates.recv().await.unwrap().status, OrderStatus::Processing);
    assert_eq!(updates.recv().await.unwrap().status, OrderStatus::Completed);
}

//--------------------------------------------------------------------------------------------------
// Scenario B: permanent inventory failure fails the order exactly once
//--------------------------------------------------------------------------------------------------

#[tokio::test]
async fn failed_event_converges_the_order_to_failed_for_subscribers() {
    let publisher = Arc::new(RecordingPublisher::default());
    let inventory = Arc::new(ScriptedInventory::default());
    inventory.fail_next(
        "p1",
        InventoryError::Permanent {
            status: 404,
            message: "product not found".to_string(),
        },
    );
    let processor = processor(Arc::clone(&publisher), inventory);

    let (env, _outcome) = envelope(&created_event_body("o1"), false);
    run_consumer_until_settled(processor, vec![env]).await;

    // The compensating event flows through the gateway side like any other
    // status event.
    let (store, registry, propagator) = gateway(vec![order("o1", "u1", OrderStatus::Created)]);
    let mut updates = registry.register("o1");
    for evt in publisher.published() {
        propagator.handle(evt).await.unwrap();
    }

    assert_eq!(
        store.find("o1").await.unwrap().unwrap().status,
        OrderStatus::Failed
    );
    assert_eq!(updates.recv().await.unwrap().status, OrderStatus::Failed);
}

#[tokio::test]
async fn permanent_inventory_failure_acks_and_emits_one_failed_event() {
    let publisher = Arc::new(RecordingPublisher::default());
    let inventory = Arc::new(ScriptedInventory::default());
    inventory.fail_next(
        "p1",
        InventoryError::Permanent {
            status: 404,
            message: "product not found".to_string(),
        },
    );
    let processor = processor(Arc::clone(&publisher), inventory);

    let (env, outcome) = envelope(&created_event_body("o1"), false);
    run_consumer_until_settled(processor, vec![env]).await;

    assert_eq!(*outcome.lock(), Some(Settled::Ack));
    let events = publisher.published();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, ORDER_FAILED);
    assert_eq!(events[0].payload["order_id"], json!("o1"));
}

//--------------------------------------------------------------------------------------------------
// Scenario C: transient failure requeues; the redelivery completes the order
//--------------------------------------------------------------------------------------------------

#[tokio::test]
async fn transient_inventory_failure_requeues_then_redelivery_succeeds() {
    let publisher = Arc::new(RecordingPublisher::default());
    let inventory = Arc::new(ScriptedInventory::default());
    inventory.fail_next(
        "p1",
        InventoryError::Transient {
            status: 503,
            message: "service unavailable".to_string(),
        },
    );
    let processor = processor(Arc::clone(&publisher), Arc::clone(&inventory));

    let (first, first_outcome) = envelope(&created_event_body("o1"), false);
    let (second, second_outcome) = envelope(&created_event_body("o1"), true);
    run_consumer_until_settled(processor, vec![first, second]).await;

    assert_eq!(*first_outcome.lock(), Some(Settled::NackRequeue));
    assert_eq!(*second_outcome.lock(), Some(Settled::Ack));

    let events = publisher.published();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, ORDER_PROCESSING);
    assert_eq!(events[1].event_type, ORDER_COMPLETED);
    // Both deliveries hit the inventory; the first run published nothing.
    assert_eq!(inventory.calls.lock().len(), 2);
}

//--------------------------------------------------------------------------------------------------
// Malformed deliveries are rejected without touching any state
//--------------------------------------------------------------------------------------------------

#[tokio::test]
async fn malformed_delivery_is_rejected_and_leaves_orders_untouched() {
    let (store, _registry, propagator) = gateway(vec![order("o1", "u1", OrderStatus::Created)]);

    let (env, outcome) = envelope(b"{ definitely not an event", false);
    run_consumer_until_settled(Arc::new(propagator), vec![env]).await;

    assert_eq!(*outcome.lock(), Some(Settled::Reject));
    assert_eq!(
        store.find("o1").await.unwrap().unwrap().status,
        OrderStatus::Created
    );
}

//--------------------------------------------------------------------------------------------------
// Out-of-order and duplicate status events never regress an order
//--------------------------------------------------------------------------------------------------

#[tokio::test]
async fn late_processing_event_cannot_regress_a_completed_order() {
    let (store, registry, propagator) = gateway(vec![order("o1", "u1", OrderStatus::Created)]);
    let mut updates = registry.register("o1");

    propagator
        .handle(Event::order_completed("o1", dec!(20)))
        .await
        .unwrap();
    propagator
        .handle(Event::order_processing("o1"))
        .await
        .unwrap();
    propagator
        .handle(Event::order_completed("o1", dec!(20)))
        .await
        .unwrap();

    assert_eq!(
        store.find("o1").await.unwrap().unwrap().status,
        OrderStatus::Completed
    );

    // Exactly one broadcast: the first completed; the stale and duplicate
    // events were no-ops.
    assert_eq!(updates.recv().await.unwrap().status, OrderStatus::Completed);
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn concurrent_status_workers_cannot_regress_the_final_status() {
    let (store, _registry, propagator) = gateway(vec![order("o1", "u1", OrderStatus::Created)]);
    let propagator = Arc::new(propagator);

    // Two workers race the processing and completed events for one order;
    // whichever lands second must not undo the terminal status.
    let (tx, rx) = mpsc::unbounded_channel();
    let (processing, processing_outcome) = {
        let body = serde_json::to_vec(&Event::order_processing("o1")).unwrap();
        let outcome = Arc::new(Mutex::new(None));
        let env = DeliveryEnvelope::new(
            body,
            ORDER_PROCESSING.to_string(),
            false,
            Box::new(RecordingAcker {
                outcome: Arc::clone(&outcome),
            }),
        );
        (env, outcome)
    };
    let (completed, completed_outcome) = {
        let body = serde_json::to_vec(&Event::order_completed("o1", dec!(20))).unwrap();
        let outcome = Arc::new(Mutex::new(None));
        let env = DeliveryEnvelope::new(
            body,
            ORDER_COMPLETED.to_string(),
            false,
            Box::new(RecordingAcker {
                outcome: Arc::clone(&outcome),
            }),
        );
        (env, outcome)
    };
    tx.send(processing).unwrap();
    tx.send(completed).unwrap();
    drop(tx);

    let token = CancellationToken::new();
    let stop = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.cancel();
    });

    EventConsumer::new(propagator, 2)
        .start(ChannelStream(rx), token)
        .await
        .expect("consumer run");

    assert_eq!(*processing_outcome.lock(), Some(Settled::Ack));
    assert_eq!(*completed_outcome.lock(), Some(Settled::Ack));
    assert_eq!(
        store.find("o1").await.unwrap().unwrap().status,
        OrderStatus::Completed
    );
}

//--------------------------------------------------------------------------------------------------
// Scenario D + auth matrix: the SSE endpoint
//--------------------------------------------------------------------------------------------------

fn sse_app(seed: Vec<Order>) -> (axum::Router, Arc<SseRegistry>) {
    let store = Arc::new(InMemoryOrderStore::new());
    for order in seed {
        store.insert(order);
    }
    let registry = Arc::new(SseRegistry::new());
    let state = Arc::new(AppState {
        store,
        registry: registry.clone(),
        authenticator: Arc::new(StaticTokenAuthenticator::new().with_token("t1", "u1")),
    });
    (router(state), registry)
}

#[tokio::test]
async fn sse_without_token_is_unauthorized() {
    let (app, _registry) = sse_app(vec![order("o1", "u1", OrderStatus::Created)]);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/order/status?id=o1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sse_with_invalid_token_is_unauthorized() {
    let (app, _registry) = sse_app(vec![order("o1", "u1", OrderStatus::Created)]);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/order/status?id=o1")
                .header("Authorization", "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sse_without_id_is_bad_request() {
    let (app, _registry) = sse_app(vec![order("o1", "u1", OrderStatus::Created)]);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/order/status?token=t1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], json!(400));
}

#[tokio::test]
async fn sse_unknown_or_foreign_order_is_not_found() {
    let (app, _registry) = sse_app(vec![order("theirs", "u2", OrderStatus::Created)]);

    for id in ["missing", "theirs"] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/order/status?id={id}&token=t1"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "id {id}");
    }
}

#[tokio::test]
async fn sse_streams_snapshot_first_then_pushed_updates() {
    let (app, registry) = sse_app(vec![order("o1", "u1", OrderStatus::Processing)]);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/order/status?id=o1")
                .header("Authorization", "Bearer t1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream"
    );
    assert_eq!(registry.subscriber_count("o1"), 1);

    let mut frames = response.into_body().into_data_stream();

    let first = tokio::time::timeout(Duration::from_secs(1), frames.next())
        .await
        .expect("snapshot frame within 1s")
        .unwrap()
        .unwrap();
    let first = String::from_utf8(first.to_vec()).unwrap();
    assert!(first.starts_with("data:"), "got frame: {first}");
    assert!(first.contains("\"PROCESSING\""), "got frame: {first}");

    registry.broadcast("o1", &order("o1", "u1", OrderStatus::Completed));
    let second = tokio::time::timeout(Duration::from_secs(1), frames.next())
        .await
        .expect("update frame within 1s")
        .unwrap()
        .unwrap();
    let second = String::from_utf8(second.to_vec()).unwrap();
    assert!(second.contains("\"COMPLETED\""), "got frame: {second}");

    // Dropping the stream is the client disconnect; the registry entry goes
    // with it.
    drop(frames);
    tokio::task::yield_now().await;
    assert_eq!(registry.subscriber_count("o1"), 0);
}

#[tokio::test]
async fn sse_accepts_token_via_query_parameter() {
    let (app, _registry) = sse_app(vec![order("o1", "u1", OrderStatus::Created)]);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/order/status?id=o1&token=t1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let (app, _registry) = sse_app(vec![]);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

//--------------------------------------------------------------------------------------------------
// Inventory error taxonomy drives retry routing end to end
//--------------------------------------------------------------------------------------------------

#[tokio::test]
async fn http_inventory_client_classifies_connection_refusal_as_transient() {
    // Nothing listens on this port; the request must fail fast as transient.
    let client = HttpInventoryClient::new("http://127.0.0.1:1");
    let err = client.update_quantity("p1", -1).await.unwrap_err();
    assert!(!err.is_permanent());
}
