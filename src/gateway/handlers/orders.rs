//! Order creation endpoint.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;
use validator::Validate;

use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, CreateOrderRequest, OrderCreatedResponse};
use crate::idempotency::ResourceType;
use crate::orders::CustomerDetails;

use super::{IdempotencyGate, complete_idempotent, idempotency_gate, with_deadline};

/// Convert a pending hold into an order.
///
/// POST /orders
///
/// After the order commits, any payment callbacks that arrived before it
/// existed are replayed synchronously, so the response already reflects
/// their outcome.
#[utoipa::path(
    post,
    path = "/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = OrderCreatedResponse),
        (status = 422, description = "Hold expired, consumed, or missing"),
        (status = 500, description = "Transient failure, nothing was committed")
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let req: CreateOrderRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation(format!("malformed request: {e}")))?;
    req.validate()
        .map_err(|e| ApiError::validation(format!("invalid request: {e}")))?;

    let gate = idempotency_gate(&state, &headers, ResourceType::Order, "/orders", &body).await?;
    let gate = match gate {
        IdempotencyGate::Cached { status, body } => return Ok((status, Json(body))),
        other => other,
    };

    let customer = CustomerDetails {
        email: req.customer_email.clone(),
        details: req.customer_details.clone(),
    };

    let result = with_deadline(
        state.config.request_timeout,
        state.orders.create_order(req.hold_id, customer),
    )
    .await;

    let order = match result {
        Ok(order) => order,
        Err(err) => {
            complete_idempotent(&state, &gate, ResourceType::Order, err.status, &err.body()).await;
            return Err(err);
        }
    };

    // Post-commit fan-out: settle callbacks that beat the order here.
    let order = match state.webhooks.replay_for_order(order.order_id).await {
        Ok(0) => order,
        Ok(applied) => {
            tracing::info!(
                order_id = %order.order_id,
                applied,
                "Deferred webhooks settled at order creation"
            );
            state
                .orders
                .get(order.order_id)
                .await
                .ok()
                .flatten()
                .unwrap_or(order)
        }
        Err(e) => {
            // The order exists either way; the sweep will surface orphans.
            tracing::warn!(order_id = %order.order_id, "Deferred replay failed: {e}");
            order
        }
    };

    let response = OrderCreatedResponse {
        order_id: order.order_id,
        status: order.status.as_str().to_string(),
        amount: order.total_amount,
        product_id: order.product_id,
        quantity: order.quantity,
        created_at: order.created_at,
    };
    let body = serde_json::to_value(&response)
        .map_err(|e| ApiError::internal(format!("response encoding failed: {e}")))?;

    complete_idempotent(&state, &gate, ResourceType::Order, StatusCode::CREATED, &body).await;
    Ok((StatusCode::CREATED, Json(body)))
}
