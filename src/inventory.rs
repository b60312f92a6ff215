//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name                 | Description                                     | Key Methods         |
// |----------------------|-------------------------------------------------|---------------------|
// | InventoryError       | Retry-eligibility classified inventory failure  | is_permanent        |
// | InventoryClient      | Capability to adjust product stock              | update_quantity     |
// | HttpInventoryClient  | reqwest-backed client for the product service   | new                 |
//--------------------------------------------------------------------------------------------------

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Inventory failure, classified by retry eligibility
///
/// The classification is the fulcrum of the pipeline's error handling: a
/// permanent failure triggers a compensating `order.failed` event and an ack,
/// anything else is nacked with requeue so the broker redelivers.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Not retryable - e.g. product not found, validation rejection
    #[error("permanent error ({status}): {message}")]
    Permanent { status: u16, message: String },
    /// Retryable - network hiccup, broker/service overload, 5xx
    #[error("transient error ({status}): {message}")]
    Transient { status: u16, message: String },
}

impl InventoryError {
    /// Whether the failure is permanent (not retryable)
    pub fn is_permanent(&self) -> bool {
        matches!(self, InventoryError::Permanent { .. })
    }
}

/// Capability to adjust the stocked quantity of a product
///
/// The production implementation talks to the product service over HTTP;
/// tests supply in-memory doubles.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Adjusts the stock of `product_id` by `quantity_change` (negative deducts)
    async fn update_quantity(
        &self,
        product_id: &str,
        quantity_change: i64,
    ) -> Result<(), InventoryError>;
}

#[derive(Serialize)]
struct UpdateQuantityRequest<'a> {
    product_id: &'a str,
    quantity_change: i64,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// HTTP client for the product service's quantity endpoint
pub struct HttpInventoryClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpInventoryClient {
    /// Creates a client for the product service at `base_url`
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn classify(status: StatusCode, message: String) -> InventoryError {
        match status {
            // 4xx client errors describe this request; retrying cannot help.
            StatusCode::BAD_REQUEST
            | StatusCode::NOT_FOUND
            | StatusCode::CONFLICT
            | StatusCode::UNPROCESSABLE_ENTITY => InventoryError::Permanent {
                status: status.as_u16(),
                message,
            },
            StatusCode::TOO_MANY_REQUESTS => InventoryError::Transient {
                status: status.as_u16(),
                message,
            },
            s if s.is_server_error() => InventoryError::Transient {
                status: s.as_u16(),
                message,
            },
            // Anything unexpected is treated as permanent rather than looping.
            s => InventoryError::Permanent {
                status: s.as_u16(),
                message,
            },
        }
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn update_quantity(
        &self,
        product_id: &str,
        quantity_change: i64,
    ) -> Result<(), InventoryError> {
        let url = format!("{}/product/updateQuantity", self.base_url);
        let body = UpdateQuantityRequest {
            product_id,
            quantity_change,
        };

        let response = self
            .http
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|err| InventoryError::Transient {
                status: 0,
                message: err.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(ErrorBody { error: Some(msg) }) if !msg.is_empty() => msg,
            _ => format!("status {}", status.as_u16()),
        };

        Err(Self::classify(status, message))
    }
}
