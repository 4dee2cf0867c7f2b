//! Webhook Processor.
//!
//! Deduplicates, sequences and applies payment outcomes. Concurrent
//! callbacks for the same order serialize at the order row lock; the
//! monotonic state machine means the first successful transition wins and
//! later conflicting callbacks observe the already-reached state.

use chrono::Duration;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::idempotency::{IdempotencyStore, ResourceType, SlotOutcome, fingerprint};
use crate::orders::{OrderService, TransitionOutcome};

use super::deferred::DeferredWebhookStore;
use super::error::WebhookError;
use super::payload::{PaymentOutcome, WebhookPayload};
use super::signature::{SignatureMode, verify_signature};

/// Canonical request line the webhook fingerprint is computed over.
const WEBHOOK_PATH: &str = "/payments/webhook";

/// Apply attempts before a webhook is parked in the dead letter table.
const APPLY_ATTEMPTS: u32 = 3;

/// Response to hand back to the gateway (and to cache for duplicates).
#[derive(Debug, Clone)]
pub struct ProcessResponse {
    pub status: u16,
    pub body: serde_json::Value,
    /// True when this response was served from a completed idempotency
    /// record instead of fresh processing.
    pub deduplicated: bool,
}

pub struct WebhookProcessor {
    pool: PgPool,
    idempotency: Arc<IdempotencyStore>,
    deferred: Arc<DeferredWebhookStore>,
    orders: Arc<OrderService>,
    clock: Arc<dyn Clock>,
    secret: Vec<u8>,
    mode: SignatureMode,
    ttl: Duration,
}

impl WebhookProcessor {
    pub fn new(
        pool: PgPool,
        idempotency: Arc<IdempotencyStore>,
        deferred: Arc<DeferredWebhookStore>,
        orders: Arc<OrderService>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        let mode = if config.webhook_verify_signature {
            SignatureMode::Required
        } else {
            SignatureMode::Disabled
        };
        if mode == SignatureMode::Disabled {
            tracing::warn!("Webhook signature verification is DISABLED (test mode)");
        }

        Self {
            pool,
            idempotency,
            deferred,
            orders,
            clock,
            secret: config.webhook_hmac_secret.clone().into_bytes(),
            mode,
            ttl: ResourceType::PaymentWebhook.ttl(config),
        }
    }

    /// Process one callback delivery.
    ///
    /// Exactly-once semantics: however many times the gateway retries a
    /// delivery with the same key, the system state equals the state after
    /// one invocation, and duplicates receive the original response.
    pub async fn process(
        &self,
        raw_body: &[u8],
        idempotency_key: Option<&str>,
        signature: Option<&str>,
    ) -> Result<ProcessResponse, WebhookError> {
        if self.mode == SignatureMode::Required {
            let signature = signature.ok_or(WebhookError::SignatureMissing)?;
            if !verify_signature(&self.secret, raw_body, signature) {
                tracing::warn!("Rejected webhook with invalid signature");
                return Err(WebhookError::SignatureInvalid);
            }
        }

        let key = idempotency_key.ok_or(WebhookError::MissingKey)?;
        let payload = WebhookPayload::parse(raw_body).map_err(WebhookError::Validation)?;

        let fp = fingerprint("POST", WEBHOOK_PATH, raw_body);
        match self
            .idempotency
            .acquire(key, ResourceType::PaymentWebhook, &fp, self.ttl)
            .await?
        {
            SlotOutcome::Acquired => {}
            SlotOutcome::Replayed(cached) => {
                tracing::debug!(idempotency_key = key, "Webhook deduplicated");
                return Ok(ProcessResponse {
                    status: cached.status,
                    body: cached.body,
                    deduplicated: true,
                });
            }
            SlotOutcome::FingerprintMismatch => return Err(WebhookError::KeyReuse),
            SlotOutcome::InFlight => return Err(WebhookError::InFlight),
        }

        if self.orders.get(payload.order_id).await?.is_none() {
            return self.defer(key, &payload, raw_body).await;
        }

        self.apply_with_dead_letter(key, &payload).await
    }

    /// Park a callback whose order does not exist yet. The idempotency
    /// record completes with the deferred response so gateway retries see
    /// a stable answer until the order shows up.
    async fn defer(
        &self,
        key: &str,
        payload: &WebhookPayload,
        raw_body: &[u8],
    ) -> Result<ProcessResponse, WebhookError> {
        let now = self.clock.now();
        let stored: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| WebhookError::Validation(format!("malformed payload: {e}")))?;

        self.deferred
            .park(payload.order_id, key, &stored, now)
            .await?;

        let body = json!({
            "status": "deferred",
            "order_id": payload.order_id,
        });
        self.idempotency
            .complete(key, ResourceType::PaymentWebhook, 202, &body)
            .await?;

        Ok(ProcessResponse {
            status: 202,
            body,
            deduplicated: false,
        })
    }

    /// Apply the outcome, retrying transient store failures. After
    /// [`APPLY_ATTEMPTS`] the webhook is parked for manual inspection and
    /// the error surfaces to the caller; other processing continues.
    async fn apply_with_dead_letter(
        &self,
        key: &str,
        payload: &WebhookPayload,
    ) -> Result<ProcessResponse, WebhookError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.apply_once(key, payload).await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < APPLY_ATTEMPTS => {
                    tracing::warn!(
                        order_id = %payload.order_id,
                        idempotency_key = key,
                        attempt,
                        "Webhook apply failed, retrying: {err}"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        order_id = %payload.order_id,
                        idempotency_key = key,
                        attempts = attempt,
                        "Webhook apply exhausted retries, parking: {err}"
                    );
                    self.park_failed(Some(payload.order_id), key, payload, &err, attempt)
                        .await;
                    return Err(err);
                }
            }
        }
    }

    async fn apply_once(
        &self,
        key: &str,
        payload: &WebhookPayload,
    ) -> Result<ProcessResponse, WebhookError> {
        let outcome = match payload.status {
            PaymentOutcome::Success => {
                self.orders
                    .mark_paid(payload.order_id, &payload.payment_reference)
                    .await?
            }
            PaymentOutcome::Failed => self.orders.mark_failed(payload.order_id).await?,
        };

        let (status, body) = match &outcome {
            TransitionOutcome::Applied(order) | TransitionOutcome::AlreadyApplied(order) => (
                200u16,
                json!({
                    "processed": true,
                    "order_id": order.order_id,
                    "order_status": order.status.as_str(),
                }),
            ),
            TransitionOutcome::Conflict(order) => (
                409u16,
                json!({
                    "processed": false,
                    "order_id": order.order_id,
                    "order_status": order.status.as_str(),
                    "error": {
                        "code": "order_state_conflict",
                        "message": format!("order is already {}", order.status),
                    },
                }),
            ),
        };

        self.idempotency
            .complete(key, ResourceType::PaymentWebhook, status, &body)
            .await?;

        Ok(ProcessResponse {
            status,
            body,
            deduplicated: false,
        })
    }

    /// Replay parked callbacks for a freshly created order, oldest first.
    ///
    /// Runs synchronously in the request that created the order, before its
    /// response goes out. Replay overwrites each record's cached "deferred"
    /// response with the final one, so late gateway retries of the original
    /// delivery see the settled answer. Returns the number of callbacks
    /// whose outcome was applied.
    pub async fn replay_for_order(&self, order_id: Uuid) -> Result<u32, WebhookError> {
        let pending = self.deferred.pending_for_order(order_id).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        tracing::info!(
            order_id = %order_id,
            count = pending.len(),
            "Replaying deferred webhooks"
        );

        let mut applied = 0u32;
        for entry in pending {
            let payload = match serde_json::from_value::<WebhookPayload>(entry.payload.clone()) {
                Ok(payload) => payload,
                Err(e) => {
                    // Validated at receipt, so this means the row was
                    // corrupted; park it and keep the queue moving.
                    tracing::error!(deferred_id = entry.id, "Corrupt deferred payload: {e}");
                    self.park_failed_raw(
                        Some(entry.order_id),
                        &entry.idempotency_key,
                        &entry.payload,
                        &format!("corrupt deferred payload: {e}"),
                        1,
                    )
                    .await;
                    self.deferred
                        .mark_replayed(entry.id, self.clock.now())
                        .await?;
                    continue;
                }
            };

            match self
                .apply_with_dead_letter(&entry.idempotency_key, &payload)
                .await
            {
                Ok(response) => {
                    self.deferred
                        .mark_replayed(entry.id, self.clock.now())
                        .await?;
                    if response.status == 200 {
                        applied += 1;
                    }
                }
                Err(err) => {
                    // Stop rather than apply later entries out of order;
                    // the remainder stays parked for the next replay.
                    tracing::warn!(
                        deferred_id = entry.id,
                        order_id = %order_id,
                        "Deferred replay halted: {err}"
                    );
                    break;
                }
            }
        }

        Ok(applied)
    }

    async fn park_failed(
        &self,
        order_id: Option<Uuid>,
        key: &str,
        payload: &WebhookPayload,
        error: &WebhookError,
        attempts: u32,
    ) {
        let raw = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
        self.park_failed_raw(order_id, key, &raw, &error.to_string(), attempts)
            .await;
    }

    async fn park_failed_raw(
        &self,
        order_id: Option<Uuid>,
        key: &str,
        payload: &serde_json::Value,
        error: &str,
        attempts: u32,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO failed_webhooks
                (order_id, idempotency_key, payload, error, attempts, parked_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order_id)
        .bind(key)
        .bind(payload)
        .bind(error)
        .bind(attempts as i32)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(idempotency_key = key, "Failed to park dead-letter webhook: {e}");
        }
    }
}
