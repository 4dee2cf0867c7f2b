//! API request/response types and the unified error shape.
//!
//! Success bodies are flat JSON per endpoint; failures share one envelope:
//! `{"error": {"code": "<typed_code>", "message": "...", "retry_after"?: n}}`.

use axum::{Json, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::orders::OrderError;
use crate::reservation::ReservationError;
use crate::webhook::WebhookError;

// ============================================================================
// Request DTOs
// ============================================================================

/// Body of `POST /holds`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateHoldRequest {
    pub product_id: Uuid,
    /// 1..=MAX_HOLD_QUANTITY; the upper bound is enforced against the
    /// configured limit in the handler.
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[validate(length(min = 1, max = 255))]
    pub session_id: Option<String>,
}

/// Body of `POST /orders`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    pub hold_id: Uuid,
    #[validate(email)]
    pub customer_email: Option<String>,
    pub customer_details: Option<serde_json::Value>,
}

// ============================================================================
// Response DTOs
// ============================================================================

/// `GET /products/{id}` response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    #[schema(value_type = String, example = "199.99")]
    pub price: Decimal,
    pub initial_stock: i32,
    pub available_stock: i32,
    pub active: bool,
}

/// `POST /holds` response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HoldCreatedResponse {
    pub hold_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub expires_at: DateTime<Utc>,
    pub expires_in_seconds: i64,
}

/// `GET /holds/{id}` response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HoldResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    /// Still usable for order creation.
    pub active: bool,
}

/// `DELETE /holds/{id}` response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HoldReleasedResponse {
    pub released: bool,
}

/// `POST /orders` response.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderCreatedResponse {
    pub order_id: Uuid,
    pub status: String,
    #[schema(value_type = String, example = "399.98")]
    pub amount: Decimal,
    pub product_id: Uuid,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

/// `GET /health` response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(value_type = String, example = "ok")]
    pub status: &'static str,
    #[schema(value_type = String)]
    pub version: &'static str,
    #[schema(value_type = String, example = "up")]
    pub database: &'static str,
}

// ============================================================================
// Error codes
// ============================================================================

/// Typed error codes surfaced in the error envelope.
pub mod error_codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const PRODUCT_NOT_FOUND: &str = "product_not_found";
    pub const PRODUCT_INACTIVE: &str = "product_inactive";
    pub const INSUFFICIENT_STOCK: &str = "insufficient_stock";
    pub const HOLD_NOT_FOUND: &str = "hold_not_found";
    pub const HOLD_EXPIRED: &str = "hold_expired";
    pub const HOLD_CONSUMED: &str = "hold_consumed";
    pub const ORDER_NOT_FOUND: &str = "order_not_found";
    pub const MISSING_IDEMPOTENCY_KEY: &str = "missing_idempotency_key";
    pub const IDEMPOTENCY_KEY_REUSE: &str = "idempotency_key_reuse";
    pub const IDEMPOTENCY_IN_FLIGHT: &str = "idempotency_in_flight";
    pub const INVALID_SIGNATURE: &str = "invalid_signature";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const TRANSIENT: &str = "transient";
    pub const INTERNAL: &str = "internal";
}

// ============================================================================
// ApiError
// ============================================================================

/// Unified API error with automatic IntoResponse.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    /// Retry hint in seconds; set on transient and in-flight conflicts.
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    /// 422 with `validation_failed`.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            error_codes::VALIDATION_FAILED,
            msg,
        )
    }

    /// 422 with a business code.
    pub fn unprocessable(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, code, msg)
    }

    /// 404 with a resource code.
    pub fn not_found(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, msg)
    }

    /// 401 for signature failures.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            error_codes::INVALID_SIGNATURE,
            msg,
        )
    }

    /// 409 with a conflict code.
    pub fn conflict(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, msg)
    }

    /// 429 on load shed.
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, error_codes::RATE_LIMITED, msg)
            .with_retry_after(1)
    }

    /// 503 for errors that are safe to retry: nothing was committed.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::TRANSIENT,
            msg,
        )
        .with_retry_after(1)
    }

    /// 500 for everything that should not happen.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::INTERNAL,
            msg,
        )
    }

    pub fn body(&self) -> serde_json::Value {
        let mut error = serde_json::json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(secs) = self.retry_after {
            error["retry_after"] = secs.into();
        }
        serde_json::json!({ "error": error })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body())).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(_: sqlx::Error) -> Self {
        ApiError::transient("store unavailable, retry shortly")
    }
}

impl From<ReservationError> for ApiError {
    fn from(err: ReservationError) -> Self {
        match &err {
            ReservationError::ProductMissing(_) => {
                ApiError::unprocessable(error_codes::PRODUCT_NOT_FOUND, err.to_string())
            }
            ReservationError::ProductInactive(_) => {
                ApiError::unprocessable(error_codes::PRODUCT_INACTIVE, err.to_string())
            }
            ReservationError::InsufficientStock { .. } => {
                ApiError::unprocessable(error_codes::INSUFFICIENT_STOCK, err.to_string())
            }
            ReservationError::InvalidQuantity(_) => ApiError::validation(err.to_string()),
            ReservationError::HoldMissing(_) => {
                ApiError::not_found(error_codes::HOLD_NOT_FOUND, err.to_string())
            }
            ReservationError::Store(_) => ApiError::transient("store unavailable, retry shortly"),
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        match &err {
            OrderError::HoldMissing(_) => {
                ApiError::unprocessable(error_codes::HOLD_NOT_FOUND, err.to_string())
            }
            OrderError::HoldExpired(_) => {
                ApiError::unprocessable(error_codes::HOLD_EXPIRED, err.to_string())
            }
            OrderError::HoldAlreadyConsumed(_) => {
                ApiError::unprocessable(error_codes::HOLD_CONSUMED, err.to_string())
            }
            OrderError::OrderMissing(_) => {
                ApiError::not_found(error_codes::ORDER_NOT_FOUND, err.to_string())
            }
            OrderError::Store(_) => ApiError::transient("store unavailable, retry shortly"),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::MissingKey => ApiError::unprocessable(
                error_codes::MISSING_IDEMPOTENCY_KEY,
                "Idempotency-Key header is required",
            ),
            WebhookError::SignatureMissing => ApiError::unauthorized("missing webhook signature"),
            WebhookError::SignatureInvalid => ApiError::unauthorized("invalid webhook signature"),
            WebhookError::Validation(msg) => ApiError::validation(msg),
            WebhookError::KeyReuse => ApiError::conflict(
                error_codes::IDEMPOTENCY_KEY_REUSE,
                "idempotency key reused with a different payload",
            ),
            WebhookError::InFlight => ApiError::conflict(
                error_codes::IDEMPOTENCY_IN_FLIGHT,
                "a request with this idempotency key is in flight",
            )
            .with_retry_after(1),
            WebhookError::Order(e) => e.into(),
            WebhookError::Store(_) => ApiError::transient("store unavailable, retry shortly"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_carries_code_and_retry_hint() {
        let err = ApiError::transient("down");
        let body = err.body();
        assert_eq!(body["error"]["code"], "transient");
        assert_eq!(body["error"]["retry_after"], 1);

        let err = ApiError::validation("bad");
        assert!(err.body()["error"].get("retry_after").is_none());
    }

    #[test]
    fn reservation_errors_map_to_spec_statuses() {
        let err: ApiError = ReservationError::InsufficientStock {
            product_id: Uuid::new_v4(),
            available: 0,
            requested: 1,
        }
        .into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, error_codes::INSUFFICIENT_STOCK);

        let err: ApiError = ReservationError::HoldMissing(Uuid::new_v4()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: ApiError = ReservationError::ProductInactive(Uuid::new_v4()).into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, error_codes::PRODUCT_INACTIVE);
    }

    #[test]
    fn order_errors_map_to_spec_statuses() {
        let err: ApiError = OrderError::HoldExpired(Uuid::new_v4()).into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, error_codes::HOLD_EXPIRED);

        let err: ApiError = OrderError::HoldMissing(Uuid::new_v4()).into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn webhook_errors_map_to_spec_statuses() {
        assert_eq!(
            ApiError::from(WebhookError::SignatureInvalid).status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(WebhookError::KeyReuse).status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(WebhookError::MissingKey).status,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        let inflight = ApiError::from(WebhookError::InFlight);
        assert_eq!(inflight.status, StatusCode::CONFLICT);
        assert_eq!(inflight.retry_after, Some(1));
    }
}
