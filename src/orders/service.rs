//! Order use-case layer.
//!
//! Transactional boundaries live here: entities are inert data plus
//! predicates, every mutation runs under the order row lock in a single
//! transaction. Webhook settlement calls into `mark_paid`/`mark_failed`;
//! the lifecycle sweep calls `cancel_stale`.

use sqlx::{PgPool, Row, postgres::PgRow};
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::StockCache;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::db::{RetryPolicy, retry_on_deadlock};
use crate::reservation::HoldStatus;
use crate::reservation::engine::row_to_hold;

use super::error::OrderError;
use super::models::{CustomerDetails, Order, OrderStatus};

/// Result of driving an order transition.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The transition was applied; the order is returned post-transition.
    Applied(Order),
    /// The order was already in the requested state; idempotent no-op.
    AlreadyApplied(Order),
    /// The order sits in a different terminal state; nothing was changed.
    Conflict(Order),
}

impl TransitionOutcome {
    pub fn order(&self) -> &Order {
        match self {
            TransitionOutcome::Applied(o)
            | TransitionOutcome::AlreadyApplied(o)
            | TransitionOutcome::Conflict(o) => o,
        }
    }
}

pub struct OrderService {
    pool: PgPool,
    cache: Arc<StockCache>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl OrderService {
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
            retry: RetryPolicy::new(config.deadlock_retries, config.deadlock_backoff),
        }
    }

    /// Create an order by consuming a pending, unexpired hold.
    ///
    /// Quantity and unit price are copied from the hold; the hold becomes
    /// `consumed` in the same transaction.
    pub async fn create_order(
        &self,
        hold_id: Uuid,
        customer: CustomerDetails,
    ) -> Result<Order, OrderError> {
        let order = retry_on_deadlock(self.retry, "create_order", || {
            self.try_create_order(hold_id, customer.clone())
        })
        .await?;

        tracing::info!(
            order_id = %order.order_id,
            hold_id = %hold_id,
            product_id = %order.product_id,
            quantity = order.quantity,
            total = %order.total_amount,
            "Created order"
        );

        Ok(order)
    }

    async fn try_create_order(
        &self,
        hold_id: Uuid,
        customer: CustomerDetails,
    ) -> Result<Order, OrderError> {
        let now = self.clock.now();
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
            return Err(OrderError::HoldMissing(hold_id));
        };
        let hold = row_to_hold(&row)?;

        match hold.status {
            HoldStatus::Consumed => return Err(OrderError::HoldAlreadyConsumed(hold_id)),
            HoldStatus::Expired => return Err(OrderError::HoldExpired(hold_id)),
            HoldStatus::Pending if hold.expires_at <= now => {
                return Err(OrderError::HoldExpired(hold_id));
            }
            HoldStatus::Pending => {}
        }

        sqlx::query("UPDATE holds SET status = $2, consumed_at = $3 WHERE hold_id = $1")
            .bind(hold_id)
            .bind(HoldStatus::Consumed.id())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let order = Order {
            order_id: super::models::order_id_for_hold(hold_id),
            hold_id,
            product_id: hold.product_id,
            quantity: hold.quantity,
            unit_price: hold.unit_price,
            total_amount: hold.unit_price * rust_decimal::Decimal::from(hold.quantity),
            status: OrderStatus::Pending,
            customer_email: customer.email,
            customer_details: customer.details,
            payment_reference: None,
            paid_at: None,
            cancelled_at: None,
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO orders
                (order_id, hold_id, product_id, quantity, unit_price, total_amount,
                 status, customer_email, customer_details, created_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.order_id)
        .bind(order.hold_id)
        .bind(order.product_id)
        .bind(order.quantity)
        .bind(order.unit_price)
        .bind(order.total_amount)
        .bind(order.status.id())
        .bind(&order.customer_email)
        .bind(&order.customer_details)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(order)
    }

    /// Read an order without locking.
    pub async fn get(&self, order_id: Uuid) -> Result<Option<Order>, OrderError> {
        let row = sqlx::query(ORDER_SELECT)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_order(&r).map_err(OrderError::from))
            .transpose()
    }

    /// `pending -> paid`. Re-delivery of the same payment reference is an
    /// idempotent no-op; any other terminal state is a conflict.
    pub async fn mark_paid(
        &self,
        order_id: Uuid,
        payment_reference: &str,
    ) -> Result<TransitionOutcome, OrderError> {
        retry_on_deadlock(self.retry, "mark_paid", || {
            self.try_mark_paid(order_id, payment_reference)
        })
        .await
    }

    async fn try_mark_paid(
        &self,
        order_id: Uuid,
        payment_reference: &str,
    ) -> Result<TransitionOutcome, OrderError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let mut order = self.lock_order(&mut tx, order_id).await?;

        match order.status {
            OrderStatus::Pending => {
                sqlx::query(
                    r#"
                    UPDATE orders
                    SET status = $2, paid_at = $3, payment_reference = $4
                    WHERE order_id = $1
                    "#,
                )
                .bind(order_id)
                .bind(OrderStatus::Paid.id())
                .bind(now)
                .bind(payment_reference)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;

                order.status = OrderStatus::Paid;
                order.paid_at = Some(now);
                order.payment_reference = Some(payment_reference.to_string());
                tracing::info!(order_id = %order_id, payment_reference, "Order paid");
                Ok(TransitionOutcome::Applied(order))
            }
            OrderStatus::Paid if order.payment_reference.as_deref() == Some(payment_reference) => {
                Ok(TransitionOutcome::AlreadyApplied(order))
            }
            _ => Ok(TransitionOutcome::Conflict(order)),
        }
    }

    /// `pending -> failed`.
    ///
    /// The hold backing the order is consumed by invariant, but if it is
    /// somehow still pending its stock is returned to the product in the
    /// same transaction.
    pub async fn mark_failed(&self, order_id: Uuid) -> Result<TransitionOutcome, OrderError> {
        let outcome =
            retry_on_deadlock(self.retry, "mark_failed", || self.try_mark_failed(order_id)).await?;

        if let TransitionOutcome::Applied(order) = &outcome {
            self.cache.invalidate(order.product_id);
        }
        Ok(outcome)
    }

    async fn try_mark_failed(&self, order_id: Uuid) -> Result<TransitionOutcome, OrderError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let mut order = self.lock_order(&mut tx, order_id).await?;

        match order.status {
            OrderStatus::Pending => {
                sqlx::query(
                    "UPDATE orders SET status = $2, cancelled_at = $3 WHERE order_id = $1",
                )
                .bind(order_id)
                .bind(OrderStatus::Failed.id())
                .bind(now)
                .execute(&mut *tx)
                .await?;

                // Invariant says the hold is consumed at this point; the
                // pending branch is retained as a safety net.
                let hold_row = sqlx::query(
                    r#"
                    SELECT hold_id, product_id, quantity, unit_price, session_id, status,
                           expires_at, created_at, consumed_at
                    FROM holds
                    WHERE hold_id = $1
                    FOR UPDATE
                    "#,
                )
                .bind(order.hold_id)
                .fetch_optional(&mut *tx)
                .await?;

                if let Some(hold_row) = hold_row {
                    let hold = row_to_hold(&hold_row)?;
                    if hold.status == HoldStatus::Pending {
                        tracing::warn!(
                            order_id = %order_id,
                            hold_id = %hold.hold_id,
                            "Hold still pending on failed order, releasing stock"
                        );
                        sqlx::query("UPDATE holds SET status = $2 WHERE hold_id = $1")
                            .bind(hold.hold_id)
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
                    }
                }

                tx.commit().await?;

                order.status = OrderStatus::Failed;
                order.cancelled_at = Some(now);
                tracing::info!(order_id = %order_id, "Order failed");
                Ok(TransitionOutcome::Applied(order))
            }
            OrderStatus::Failed => Ok(TransitionOutcome::AlreadyApplied(order)),
            _ => Ok(TransitionOutcome::Conflict(order)),
        }
    }

    /// `pending -> cancelled`, restoring the order's stock to the product
    /// so the conservation identity stays exact.
    pub async fn cancel(&self, order_id: Uuid) -> Result<TransitionOutcome, OrderError> {
        let outcome =
            retry_on_deadlock(self.retry, "cancel_order", || self.try_cancel(order_id)).await?;

        if let TransitionOutcome::Applied(order) = &outcome {
            self.cache.invalidate(order.product_id);
        }
        Ok(outcome)
    }

    async fn try_cancel(&self, order_id: Uuid) -> Result<TransitionOutcome, OrderError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let mut order = self.lock_order(&mut tx, order_id).await?;

        match order.status {
            OrderStatus::Pending => {
                sqlx::query(
                    "UPDATE orders SET status = $2, cancelled_at = $3 WHERE order_id = $1",
                )
                .bind(order_id)
                .bind(OrderStatus::Cancelled.id())
                .bind(now)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "UPDATE products SET available_stock = available_stock + $2 WHERE product_id = $1",
                )
                .bind(order.product_id)
                .bind(order.quantity)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;

                order.status = OrderStatus::Cancelled;
                order.cancelled_at = Some(now);
                tracing::info!(order_id = %order_id, "Order cancelled, stock restored");
                Ok(TransitionOutcome::Applied(order))
            }
            OrderStatus::Cancelled => Ok(TransitionOutcome::AlreadyApplied(order)),
            _ => Ok(TransitionOutcome::Conflict(order)),
        }
    }

    /// Cancel pending orders older than `window`. Used by the lifecycle
    /// sweep; per-order failures are logged and do not abort the batch.
    pub async fn cancel_stale(
        &self,
        window: chrono::Duration,
        limit: i64,
    ) -> Result<u64, OrderError> {
        let cutoff = self.clock.now() - window;

        let stale: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT order_id
            FROM orders
            WHERE status = $1 AND created_at <= $2
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(OrderStatus::Pending.id())
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut cancelled = 0u64;
        for order_id in stale {
            match self.cancel(order_id).await {
                Ok(TransitionOutcome::Applied(_)) => cancelled += 1,
                // Raced with a webhook; the terminal state wins.
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(order_id = %order_id, "Failed to cancel stale order: {e}");
                }
            }
        }

        Ok(cancelled)
    }

    async fn lock_order(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        order_id: Uuid,
    ) -> Result<Order, OrderError> {
        let row = sqlx::query(ORDER_SELECT_FOR_UPDATE)
            .bind(order_id)
            .fetch_optional(&mut **tx)
            .await?;

        let Some(row) = row else {
            return Err(OrderError::OrderMissing(order_id));
        };
        Ok(row_to_order(&row)?)
    }
}

const ORDER_SELECT: &str = r#"
SELECT order_id, hold_id, product_id, quantity, unit_price, total_amount, status,
       customer_email, customer_details, payment_reference, paid_at, cancelled_at, created_at
FROM orders
WHERE order_id = $1
"#;

const ORDER_SELECT_FOR_UPDATE: &str = r#"
SELECT order_id, hold_id, product_id, quantity, unit_price, total_amount, status,
       customer_email, customer_details, payment_reference, paid_at, cancelled_at, created_at
FROM orders
WHERE order_id = $1
FOR UPDATE
"#;

fn row_to_order(row: &PgRow) -> Result<Order, sqlx::Error> {
    let status_id: i16 = row.get("status");
    let status = OrderStatus::from_id(status_id)
        .ok_or_else(|| sqlx::Error::Decode(format!("invalid order status id {status_id}").into()))?;

    Ok(Order {
        order_id: row.get("order_id"),
        hold_id: row.get("hold_id"),
        product_id: row.get("product_id"),
        quantity: row.get("quantity"),
        unit_price: row.get("unit_price"),
        total_amount: row.get("total_amount"),
        status,
        customer_email: row.get("customer_email"),
        customer_details: row.get("customer_details"),
        payment_reference: row.get("payment_reference"),
        paid_at: row.get("paid_at"),
        cancelled_at: row.get("cancelled_at"),
        created_at: row.get("created_at"),
    })
}
