//! Idempotency records.
//!
//! Mutual exclusion between concurrent duplicate requests comes from the
//! uniqueness constraint on `(key, resource_type)`: the first writer inserts
//! the record in a locked-but-incomplete state, everyone else inspects what
//! they find there. Completed records cache the response for replay.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::AppConfig;

/// Age in seconds after which an incomplete record's lock may be taken
/// over. A holder that has not completed within this window is presumed
/// dead.
pub const LOCK_TAKEOVER_SECS: i64 = 10;

/// Resource families with independent idempotency namespaces and TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    PaymentWebhook,
    Order,
    Hold,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::PaymentWebhook => "payment_webhook",
            ResourceType::Order => "order",
            ResourceType::Hold => "hold",
        }
    }

    /// Record lifetime per resource type.
    pub fn ttl(&self, config: &AppConfig) -> Duration {
        let std_ttl = match self {
            ResourceType::PaymentWebhook => config.idempotency_ttl_webhook,
            ResourceType::Order => config.idempotency_ttl_order,
            ResourceType::Hold => config.idempotency_ttl_hold,
        };
        Duration::from_std(std_ttl).unwrap_or_else(|_| Duration::hours(24))
    }
}

/// Request fingerprint: hex SHA-256 over method, path and raw body. A key
/// reused with a different fingerprint is a conflict, never a replay.
pub fn fingerprint(method: &str, path: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Response cached on a completed record.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// What the caller holds after trying to claim a slot.
#[derive(Debug)]
pub enum SlotOutcome {
    /// Slot claimed; the caller must `complete` it.
    Acquired,
    /// A completed record with the same fingerprint exists; return its
    /// cached response untouched.
    Replayed(CachedResponse),
    /// A completed record exists for a different payload.
    FingerprintMismatch,
    /// Another holder is processing this key right now.
    InFlight,
}

pub struct IdempotencyStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl IdempotencyStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Claim the `(key, resource_type)` slot.
    ///
    /// Insert-or-inspect: the unique constraint arbitrates between
    /// concurrent claimants; a stale incomplete lock (older than
    /// [`LOCK_TAKEOVER_SECS`]) is taken over with a CAS update.
    pub async fn acquire(
        &self,
        key: &str,
        resource_type: ResourceType,
        fingerprint: &str,
        ttl: Duration,
    ) -> Result<SlotOutcome, sqlx::Error> {
        let now = self.clock.now();

        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_records
                (key, resource_type, fingerprint, locked_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key, resource_type) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(resource_type.as_str())
        .bind(fingerprint)
        .bind(now)
        .bind(now + ttl)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            return Ok(SlotOutcome::Acquired);
        }

        let row = sqlx::query(
            r#"
            SELECT fingerprint, response_status, response_body, locked_at, completed_at, expires_at
            FROM idempotency_records
            WHERE key = $1 AND resource_type = $2
            "#,
        )
        .bind(key)
        .bind(resource_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        // The record vanished between insert and select (TTL purge); retry
        // the claim as a fresh insert on the caller's next attempt.
        let Some(row) = row else {
            return Ok(SlotOutcome::InFlight);
        };

        let stored_fingerprint: String = row.get("fingerprint");
        let completed_at: Option<DateTime<Utc>> = row.get("completed_at");
        let locked_at: DateTime<Utc> = row.get("locked_at");
        let expires_at: DateTime<Utc> = row.get("expires_at");

        if completed_at.is_some() {
            if expires_at <= now {
                // Expired completed record: recycle the slot.
                return self
                    .recycle_expired(key, resource_type, fingerprint, now, ttl)
                    .await;
            }
            if stored_fingerprint == fingerprint {
                let status: Option<i32> = row.get("response_status");
                let body: Option<serde_json::Value> = row.get("response_body");
                return Ok(SlotOutcome::Replayed(CachedResponse {
                    status: status.unwrap_or(200) as u16,
                    body: body.unwrap_or(serde_json::Value::Null),
                }));
            }
            return Ok(SlotOutcome::FingerprintMismatch);
        }

        if (now - locked_at).num_seconds() < LOCK_TAKEOVER_SECS {
            return Ok(SlotOutcome::InFlight);
        }

        // Stale lock: take it over, CAS on the old locked_at.
        let taken = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET fingerprint = $3, locked_at = $4, expires_at = $5
            WHERE key = $1 AND resource_type = $2
              AND completed_at IS NULL
              AND locked_at = $6
            "#,
        )
        .bind(key)
        .bind(resource_type.as_str())
        .bind(fingerprint)
        .bind(now)
        .bind(now + ttl)
        .bind(locked_at)
        .execute(&self.pool)
        .await?;

        if taken.rows_affected() > 0 {
            Ok(SlotOutcome::Acquired)
        } else {
            Ok(SlotOutcome::InFlight)
        }
    }

    async fn recycle_expired(
        &self,
        key: &str,
        resource_type: ResourceType,
        fingerprint: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<SlotOutcome, sqlx::Error> {
        let recycled = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET fingerprint = $3, locked_at = $4, expires_at = $5,
                completed_at = NULL, response_status = NULL, response_body = NULL
            WHERE key = $1 AND resource_type = $2 AND expires_at <= $4
            "#,
        )
        .bind(key)
        .bind(resource_type.as_str())
        .bind(fingerprint)
        .bind(now)
        .bind(now + ttl)
        .execute(&self.pool)
        .await?;

        if recycled.rows_affected() > 0 {
            Ok(SlotOutcome::Acquired)
        } else {
            Ok(SlotOutcome::InFlight)
        }
    }

    /// Mark the slot completed with the response to replay for duplicates.
    pub async fn complete(
        &self,
        key: &str,
        resource_type: ResourceType,
        status: u16,
        body: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE idempotency_records
            SET completed_at = $3, response_status = $4, response_body = $5
            WHERE key = $1 AND resource_type = $2
            "#,
        )
        .bind(key)
        .bind(resource_type.as_str())
        .bind(self.clock.now())
        .bind(status as i32)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drop expired records. Called by the lifecycle sweep.
    pub async fn purge_expired(&self) -> Result<u64, sqlx::Error> {
        let purged = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= $1")
            .bind(self.clock.now())
            .execute(&self.pool)
            .await?;

        Ok(purged.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_names_are_stable() {
        // These strings are persisted; changing one orphans old records.
        assert_eq!(ResourceType::PaymentWebhook.as_str(), "payment_webhook");
        assert_eq!(ResourceType::Order.as_str(), "order");
        assert_eq!(ResourceType::Hold.as_str(), "hold");
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint("POST", "/payments/webhook", b"{\"x\":1}");
        let b = fingerprint("POST", "/payments/webhook", b"{\"x\":1}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_covers_every_component() {
        let base = fingerprint("POST", "/payments/webhook", b"body");
        assert_ne!(base, fingerprint("PUT", "/payments/webhook", b"body"));
        assert_ne!(base, fingerprint("POST", "/orders", b"body"));
        assert_ne!(base, fingerprint("POST", "/payments/webhook", b"other"));
    }

    #[test]
    fn component_boundaries_are_unambiguous() {
        // method/path concatenation must not collide across the separator
        assert_ne!(
            fingerprint("POST", "/a/b", b""),
            fingerprint("POST/a", "/b", b"")
        );
    }
}
