//! Stock Reservation Engine.
//!
//! Atomic hold creation and release. Reservations for the same product
//! serialize at the product row lock; successful reservations in commit
//! order never sum past `initial_stock`. On any failure no state change is
//! observable: the transaction is dropped and rolls back.

use chrono::Duration;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::StockCache;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::db::{RetryPolicy, retry_on_deadlock};

use super::error::ReservationError;
use super::models::{Hold, HoldStatus};

/// Result of releasing a hold. Release is idempotent: terminal holds are
/// reported, not failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The hold was pending; its stock went back to the product.
    Released,
    /// Already expired earlier; nothing to do.
    AlreadyExpired,
    /// Consumed by an order; stock belongs to the order now.
    AlreadyConsumed,
}

pub struct ReservationEngine {
    pool: PgPool,
    cache: Arc<StockCache>,
    clock: Arc<dyn Clock>,
    hold_ttl: Duration,
    retry: RetryPolicy,
}

impl ReservationEngine {
    pub fn new(
        pool: PgPool,
        cache: Arc<StockCache>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        Self {
            pool,
            cache,
            clock,
            hold_ttl: Duration::from_std(config.hold_ttl).unwrap_or_else(|_| Duration::seconds(120)),
            retry: RetryPolicy::new(config.deadlock_retries, config.deadlock_backoff),
        }
    }

    /// Reserve `quantity` units of a product.
    ///
    /// On success the product's `available_stock` has been decremented and a
    /// pending hold with `expires_at = now + hold_ttl` exists, all in one
    /// committed transaction.
    pub async fn reserve(
        &self,
        product_id: Uuid,
        quantity: i32,
        session_id: Option<String>,
    ) -> Result<Hold, ReservationError> {
        if quantity < 1 {
            return Err(ReservationError::InvalidQuantity(quantity));
        }

        let (hold, remaining) = retry_on_deadlock(self.retry, "reserve", || {
            self.try_reserve(product_id, quantity, session_id.clone())
        })
        .await?;

        // Post-commit: the cache is non-authoritative, refresh is best effort.
        self.cache.invalidate(product_id);
        self.cache.put(product_id, remaining);

        tracing::info!(
            hold_id = %hold.hold_id,
            product_id = %product_id,
            quantity,
            expires_at = %hold.expires_at,
            "Reserved stock"
        );

        Ok(hold)
    }

    async fn try_reserve(
        &self,
        product_id: Uuid,
        quantity: i32,
        session_id: Option<String>,
    ) -> Result<(Hold, i32), ReservationError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT price, available_stock, active
            FROM products
            WHERE product_id = $1
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(ReservationError::ProductMissing(product_id));
        };

        let active: bool = row.get("active");
        let available: i32 = row.get("available_stock");
        let price: Decimal = row.get("price");

        if !active {
            return Err(ReservationError::ProductInactive(product_id));
        }
        if available < quantity {
            return Err(ReservationError::InsufficientStock {
                product_id,
                available,
                requested: quantity,
            });
        }

        sqlx::query(
            "UPDATE products SET available_stock = available_stock - $2 WHERE product_id = $1",
        )
        .bind(product_id)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        let hold = Hold {
            hold_id: Uuid::new_v4(),
            product_id,
            quantity,
            unit_price: price,
            session_id,
            status: HoldStatus::Pending,
            expires_at: now + self.hold_ttl,
            created_at: now,
            consumed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO holds
                (hold_id, product_id, quantity, unit_price, session_id, status, expires_at, created_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(hold.hold_id)
        .bind(hold.product_id)
        .bind(hold.quantity)
        .bind(hold.unit_price)
        .bind(&hold.session_id)
        .bind(hold.status.id())
        .bind(hold.expires_at)
        .bind(hold.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((hold, available - quantity))
    }

    /// Release a hold, returning its stock to the product if it was still
    /// pending. Idempotent: terminal holds are a no-op.
    pub async fn release(&self, hold_id: Uuid) -> Result<ReleaseOutcome, ReservationError> {
        let (outcome, product_id) =
            retry_on_deadlock(self.retry, "release", || self.try_release(hold_id)).await?;

        if outcome == ReleaseOutcome::Released {
            self.cache.invalidate(product_id);
            tracing::info!(hold_id = %hold_id, product_id = %product_id, "Released hold");
        }

        Ok(outcome)
    }

    async fn try_release(
        &self,
        hold_id: Uuid,
    ) -> Result<(ReleaseOutcome, Uuid), ReservationError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT hold_id, product_id, quantity, unit_price, session_id, status,
                   expires_at, created_at, consumed_at
            FROM holds
            WHERE hold_id = $1
            FOR UPDATE
            "#,
        )
        .bind(hold_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(ReservationError::HoldMissing(hold_id));
        };
        let hold = row_to_hold(&row)?;

        match hold.status {
            HoldStatus::Consumed => Ok((ReleaseOutcome::AlreadyConsumed, hold.product_id)),
            HoldStatus::Expired => Ok((ReleaseOutcome::AlreadyExpired, hold.product_id)),
            HoldStatus::Pending => {
                sqlx::query("UPDATE holds SET status = $2 WHERE hold_id = $1")
                    .bind(hold_id)
                    .bind(HoldStatus::Expired.id())
                    .execute(&mut *tx)
                    .await?;

                sqlx::query(
                    "UPDATE products SET available_stock = available_stock + $2 WHERE product_id = $1",
                )
                .bind(hold.product_id)
                .bind(hold.quantity)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok((ReleaseOutcome::Released, hold.product_id))
            }
        }
    }

    /// Read a hold without locking.
    pub async fn get_hold(&self, hold_id: Uuid) -> Result<Option<Hold>, ReservationError> {
        let row = sqlx::query(
            r#"
            SELECT hold_id, product_id, quantity, unit_price, session_id, status,
                   expires_at, created_at, consumed_at
            FROM holds
            WHERE hold_id = $1
            "#,
        )
        .bind(hold_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_hold(&r).map_err(ReservationError::from))
            .transpose()
    }
}

/// Map a holds row. Shared with the order machine, which locks hold rows in
/// its own transactions.
pub(crate) fn row_to_hold(row: &PgRow) -> Result<Hold, sqlx::Error> {
    let status_id: i16 = row.get("status");
    let status = HoldStatus::from_id(status_id)
        .ok_or_else(|| sqlx::Error::Decode(format!("invalid hold status id {status_id}").into()))?;

    Ok(Hold {
        hold_id: row.get("hold_id"),
        product_id: row.get("product_id"),
        quantity: row.get("quantity"),
        unit_price: row.get("unit_price"),
        session_id: row.get("session_id"),
        status,
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        consumed_at: row.get("consumed_at"),
    })
}
