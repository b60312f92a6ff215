//--------------------------------------------------------------------------------------------------
// STRUCTS, TRAITS & FUNCTIONS
//--------------------------------------------------------------------------------------------------
// | Name                     | Description                                | Key Methods / Return  |
// |--------------------------|--------------------------------------------|-----------------------|
// | ApiError                 | Error types for the status API             | into_response         |
// | TokenAuthenticator       | Capability to resolve a bearer token       | user_for_token        |
// | StaticTokenAuthenticator | Fixed token -> user map                    | with_token            |
// | AppState                 | Shared state behind the status routes      |                       |
// | router                   | Builds the axum router                     | Router                |
// | stream_order_status      | SSE stream of one order's status           | ApiResult<Sse<..>>    |
//--------------------------------------------------------------------------------------------------

use async_trait::async_trait;
use axum::{
    extract::{Extension, Query},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use super::{OrderUpdates, SseRegistry};
use crate::{
    domain::Order,
    store::{OrderStore, StoreError},
};

/// Interval between `: keepalive` comment frames on an open stream
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Type alias for Result with ApiError
pub type ApiResult<T> = Result<T, ApiError>;

/// Error types for the status API
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// The bearer token is missing or invalid
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The request was invalid
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The requested resource was not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "code": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Capability to resolve a bearer token to a user id
///
/// Deliberately narrow: this pipeline only needs to know WHO holds the
/// token so it can check order ownership; issuing and revoking tokens is
/// someone else's job.
#[async_trait]
pub trait TokenAuthenticator: Send + Sync {
    /// Returns the user id the token belongs to, or None if invalid
    async fn user_for_token(&self, token: &str) -> Option<String>;
}

/// Fixed token -> user map, for the gateway bin and tests
#[derive(Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, user_id: &str) -> Self {
        self.tokens.insert(token.to_string(), user_id.to_string());
        self
    }
}

#[async_trait]
impl TokenAuthenticator for StaticTokenAuthenticator {
    async fn user_for_token(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

/// Shared state behind the status routes
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub registry: Arc<SseRegistry>,
    pub authenticator: Arc<dyn TokenAuthenticator>,
}

/// Builds the status gateway router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/order/status", get(stream_order_status))
        .route("/health", get(health))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    id: Option<String>,
    token: Option<String>,
}

/// SSE stream of one order's status
///
/// Auth accepts the bearer token from the `Authorization` header or from the
/// `token` query parameter - the browser `EventSource` API cannot set
/// headers. All failures are plain JSON responses emitted before any
/// streaming starts; once the stream is open the first frame is the current
/// order snapshot, followed by one frame per status change and periodic
/// keepalive comments.
pub async fn stream_order_status(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<StatusQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>> {
    let token = bearer_token(&headers)
        .or(params.token.as_deref())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    let user_id = state
        .authenticator
        .user_for_token(token)
        .await
        .ok_or_else(|| ApiError::Unauthorized("invalid token".to_string()))?;

    let order_id = params
        .id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("id query parameter is required".to_string()))?;

    // Ownership doubles as existence: a foreign order id gets the same 404
    // as an unknown one.
    let order = state
        .store
        .find(order_id)
        .await?
        .filter(|order| order.user_id == user_id)
        .ok_or_else(|| ApiError::NotFound(format!("Order {} not found", order_id)))?;

    let updates = state.registry.register(order_id);
    info!(order_id, user_id = %user_id, "sse stream opened");

    Ok(Sse::new(order_stream(order, updates)).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    ))
}

/// Snapshot first, then registry-pushed updates until the client disconnects
///
/// Dropping the stream drops `updates`, whose destructor removes the
/// subscription from the registry.
fn order_stream(
    snapshot: Order,
    updates: OrderUpdates,
) -> impl Stream<Item = Result<SseEvent, axum::Error>> {
    let first = futures::stream::once(async move { SseEvent::default().json_data(&snapshot) });
    let rest = futures::stream::unfold(updates, |mut updates| async move {
        let order = updates.recv().await?;
        Some((SseEvent::default().json_data(&order), updates))
    });
    futures::StreamExt::chain(first, rest)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
