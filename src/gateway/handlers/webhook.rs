//! Payment gateway callback endpoint.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;

use crate::gateway::state::AppState;
use crate::gateway::types::ApiError;

use super::{IDEMPOTENCY_HEADER, with_deadline};

/// Receive a payment outcome callback.
///
/// POST /payments/webhook
///
/// Requires an `Idempotency-Key` header and (in production) a valid
/// HMAC-SHA256 signature over the raw body. Duplicates return the original
/// response; callbacks for orders that do not exist yet are deferred with
/// 202 and absorbed when the order is created.
#[utoipa::path(
    post,
    path = "/payments/webhook",
    request_body(content = String, description = "Payment callback JSON", content_type = "application/json"),
    responses(
        (status = 200, description = "Outcome applied, or cached prior response"),
        (status = 202, description = "Order unknown; callback deferred"),
        (status = 401, description = "Missing or invalid signature"),
        (status = 409, description = "Idempotency conflict (key reuse or concurrent processing)"),
        (status = 422, description = "Invalid payload or missing Idempotency-Key")
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok());
    let signature = headers
        .get(state.config.webhook_signature_header.as_str())
        .and_then(|v| v.to_str().ok());

    let response = with_deadline(
        state.config.request_timeout,
        state.webhooks.process(&body, idempotency_key, signature),
    )
    .await?;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    Ok((status, Json(response.body)))
}
