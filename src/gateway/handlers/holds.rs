//! Hold endpoints: create, inspect, release.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::gateway::state::AppState;
use crate::gateway::types::{
    ApiError, CreateHoldRequest, HoldCreatedResponse, HoldReleasedResponse, HoldResponse,
    error_codes,
};
use crate::idempotency::ResourceType;
use crate::reservation::{HoldStatus, ReleaseOutcome};

use super::{IdempotencyGate, complete_idempotent, idempotency_gate, with_deadline};

/// Reserve stock, creating a pending hold.
///
/// POST /holds
///
/// Sheds load with 429 when too many reservations are in flight. An
/// optional `Idempotency-Key` header makes retries safe.
#[utoipa::path(
    post,
    path = "/holds",
    request_body = CreateHoldRequest,
    responses(
        (status = 201, description = "Hold created", body = HoldCreatedResponse),
        (status = 422, description = "Invalid request, insufficient stock, or inactive product"),
        (status = 429, description = "Reservation capacity exhausted, retry later"),
        (status = 500, description = "Transient failure, nothing was reserved")
    ),
    tag = "Holds"
)]
pub async fn create_hold(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    // Shed load before doing any work.
    let _permit = state
        .reserve_permits
        .try_acquire()
        .map_err(|_| ApiError::rate_limited("reservation capacity exhausted"))?;

    let req: CreateHoldRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation(format!("malformed request: {e}")))?;
    req.validate()
        .map_err(|e| ApiError::validation(format!("invalid request: {e}")))?;

    let max_quantity = state.config.max_hold_quantity as i32;
    if req.quantity > max_quantity {
        return Err(ApiError::validation(format!(
            "quantity exceeds the maximum of {max_quantity} per hold"
        )));
    }

    let gate = idempotency_gate(&state, &headers, ResourceType::Hold, "/holds", &body).await?;
    let gate = match gate {
        IdempotencyGate::Cached { status, body } => return Ok((status, Json(body))),
        other => other,
    };

    let result = with_deadline(
        state.config.request_timeout,
        state
            .engine
            .reserve(req.product_id, req.quantity, req.session_id.clone()),
    )
    .await;

    match result {
        Ok(hold) => {
            let now = state.clock.now();
            let response = HoldCreatedResponse {
                hold_id: hold.hold_id,
                product_id: hold.product_id,
                quantity: hold.quantity,
                expires_at: hold.expires_at,
                expires_in_seconds: hold.expires_in_seconds(now),
            };
            let body = serde_json::to_value(&response)
                .map_err(|e| ApiError::internal(format!("response encoding failed: {e}")))?;

            complete_idempotent(&state, &gate, ResourceType::Hold, StatusCode::CREATED, &body)
                .await;
            Ok((StatusCode::CREATED, Json(body)))
        }
        Err(err) => {
            // Business rejections are deterministic; cache them so retries
            // with the same key answer identically.
            complete_idempotent(&state, &gate, ResourceType::Hold, err.status, &err.body()).await;
            Err(err)
        }
    }
}

/// Inspect a hold.
///
/// GET /holds/{id}
#[utoipa::path(
    get,
    path = "/holds/{id}",
    params(
        ("id" = Uuid, Path, description = "Hold ID")
    ),
    responses(
        (status = 200, description = "Hold state", body = HoldResponse),
        (status = 404, description = "Hold not found")
    ),
    tag = "Holds"
)]
pub async fn get_hold(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<HoldResponse>, ApiError> {
    let hold = with_deadline(state.config.request_timeout, state.engine.get_hold(id))
        .await?
        .ok_or_else(|| ApiError::not_found(error_codes::HOLD_NOT_FOUND, "hold not found"))?;

    let now = state.clock.now();
    // A pending hold past its deadline reads as expired even before the
    // sweep reaches it.
    let effective_status = if hold.is_expired(now) {
        HoldStatus::Expired
    } else {
        hold.status
    };

    Ok(Json(HoldResponse {
        id: hold.hold_id,
        product_id: hold.product_id,
        quantity: hold.quantity,
        status: effective_status.as_str().to_string(),
        expires_at: hold.expires_at,
        active: hold.is_active(now),
    }))
}

/// Release a hold, returning its stock. Idempotent.
///
/// DELETE /holds/{id}
#[utoipa::path(
    delete,
    path = "/holds/{id}",
    params(
        ("id" = Uuid, Path, description = "Hold ID")
    ),
    responses(
        (status = 200, description = "Hold released (or already expired)", body = HoldReleasedResponse),
        (status = 404, description = "Hold not found"),
        (status = 422, description = "Hold already consumed by an order")
    ),
    tag = "Holds"
)]
pub async fn release_hold(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<HoldReleasedResponse>, ApiError> {
    let outcome = with_deadline(state.config.request_timeout, state.engine.release(id)).await?;

    match outcome {
        ReleaseOutcome::Released | ReleaseOutcome::AlreadyExpired => {
            Ok(Json(HoldReleasedResponse { released: true }))
        }
        ReleaseOutcome::AlreadyConsumed => Err(ApiError::unprocessable(
            error_codes::HOLD_CONSUMED,
            "hold was already consumed by an order",
        )),
    }
}
