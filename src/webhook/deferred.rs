//! Deferred webhooks: callbacks that arrived before their order existed.
//!
//! Parked rows are consumed in `received_at` order when the order is
//! created. A row is only marked replayed after its outcome was applied.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

/// A parked payment callback.
#[derive(Debug, Clone)]
pub struct DeferredWebhook {
    pub id: i64,
    pub order_id: Uuid,
    pub idempotency_key: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub replayed_at: Option<DateTime<Utc>>,
}

pub struct DeferredWebhookStore {
    pool: PgPool,
}

impl DeferredWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Park a callback for an order that does not exist yet.
    pub async fn park(
        &self,
        order_id: Uuid,
        idempotency_key: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO deferred_webhooks (order_id, idempotency_key, payload, received_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(order_id)
        .bind(idempotency_key)
        .bind(payload)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            order_id = %order_id,
            idempotency_key,
            deferred_id = id,
            "Parked webhook for order that does not exist yet"
        );

        Ok(id)
    }

    /// Unreplayed callbacks for an order, oldest first. The `id` tiebreak
    /// keeps same-timestamp rows in arrival order.
    pub async fn pending_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<DeferredWebhook>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, idempotency_key, payload, received_at, replayed_at
            FROM deferred_webhooks
            WHERE order_id = $1 AND replayed_at IS NULL
            ORDER BY received_at ASC, id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_deferred).collect())
    }

    pub async fn mark_replayed(&self, id: i64, now: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE deferred_webhooks SET replayed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Count parked rows older than `cutoff` that were never replayed.
    /// Surfaced by the sweep for operator visibility; nothing is deleted.
    pub async fn count_orphans(&self, cutoff: DateTime<Utc>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM deferred_webhooks
            WHERE replayed_at IS NULL AND received_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
    }
}

fn row_to_deferred(row: &PgRow) -> DeferredWebhook {
    DeferredWebhook {
        id: row.get("id"),
        order_id: row.get("order_id"),
        idempotency_key: row.get("idempotency_key"),
        payload: row.get("payload"),
        received_at: row.get("received_at"),
        replayed_at: row.get("replayed_at"),
    }
}
