//! HTTP handlers: thin request/response mapping around the core
//! operations.

pub mod health;
pub mod holds;
pub mod orders;
pub mod products;
pub mod webhook;

pub use health::health_check;
pub use holds::{create_hold, get_hold, release_hold};
pub use orders::create_order;
pub use products::get_product;
pub use webhook::payment_webhook;

use axum::http::{HeaderMap, StatusCode};
use std::future::Future;
use std::time::Duration;

use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, error_codes};
use crate::idempotency::{ResourceType, SlotOutcome, fingerprint};

/// Header carrying client idempotency keys.
pub(crate) const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Run a core operation under the request deadline. On expiry the in-flight
/// future is dropped, which rolls back any open transaction; the caller
/// sees a transient error and may retry.
pub(crate) async fn with_deadline<T, E, F>(limit: Duration, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, E>>,
    ApiError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ApiError::from(err)),
        Err(_) => Err(ApiError::transient("request deadline exceeded")),
    }
}

/// Outcome of claiming an optional idempotency slot for a mutating request.
pub(crate) enum IdempotencyGate {
    /// No key supplied; process normally.
    Absent,
    /// Slot claimed; complete it with the final response.
    Acquired { key: String },
    /// Duplicate of a completed request; answer with the cached response.
    Cached {
        status: StatusCode,
        body: serde_json::Value,
    },
}

/// Claim the idempotency slot named by the `Idempotency-Key` header, when
/// present. The fingerprint covers method, path and raw body, so a reused
/// key with a different payload conflicts instead of replaying.
pub(crate) async fn idempotency_gate(
    state: &AppState,
    headers: &HeaderMap,
    resource: ResourceType,
    path: &str,
    raw_body: &[u8],
) -> Result<IdempotencyGate, ApiError> {
    let Some(key) = headers.get(IDEMPOTENCY_HEADER).and_then(|v| v.to_str().ok()) else {
        return Ok(IdempotencyGate::Absent);
    };

    let fp = fingerprint("POST", path, raw_body);
    let ttl = resource.ttl(&state.config);

    match state.idempotency.acquire(key, resource, &fp, ttl).await? {
        SlotOutcome::Acquired => Ok(IdempotencyGate::Acquired {
            key: key.to_string(),
        }),
        SlotOutcome::Replayed(cached) => Ok(IdempotencyGate::Cached {
            status: StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK),
            body: cached.body,
        }),
        SlotOutcome::FingerprintMismatch => Err(ApiError::conflict(
            error_codes::IDEMPOTENCY_KEY_REUSE,
            "idempotency key reused with a different payload",
        )),
        SlotOutcome::InFlight => Err(ApiError::conflict(
            error_codes::IDEMPOTENCY_IN_FLIGHT,
            "a request with this idempotency key is in flight",
        )
        .with_retry_after(1)),
    }
}

/// Cache the final response on an acquired slot. Transient failures are
/// never cached: the lock ages out and a retry reprocesses.
pub(crate) async fn complete_idempotent(
    state: &AppState,
    gate: &IdempotencyGate,
    resource: ResourceType,
    status: StatusCode,
    body: &serde_json::Value,
) {
    if let IdempotencyGate::Acquired { key } = gate {
        if status.is_server_error() {
            return;
        }
        if let Err(e) = state
            .idempotency
            .complete(key, resource, status.as_u16(), body)
            .await
        {
            tracing::warn!(idempotency_key = %key, "Failed to complete idempotency record: {e}");
        }
    }
}
