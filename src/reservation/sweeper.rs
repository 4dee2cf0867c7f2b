//! Hold Lifecycle Manager.
//!
//! A periodic worker that reclaims stock from expired holds, cancels
//! pending orders that outlived the payment window, and purges expired
//! idempotency records. At most one instance runs at a time across the
//! deployment, arbitrated by a lease row; a run that cannot take the lease
//! is skipped, never queued.

use chrono::Duration as ChronoDuration;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::idempotency::IdempotencyStore;
use crate::orders::{OrderError, OrderService};
use crate::webhook::DeferredWebhookStore;

use super::engine::{ReleaseOutcome, ReservationEngine};
use super::error::ReservationError;
use super::models::HoldStatus;

/// Lease name shared by every sweeper instance.
const LEASE_NAME: &str = "hold_sweeper";

/// Lease lifetime in minutes. A crashed holder blocks other instances for
/// at most this long.
const LEASE_TTL_MINUTES: i64 = 5;

/// Deferred rows older than this many hours are reported as orphans.
const ORPHAN_AGE_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum SweeperError {
    #[error("reservation error: {0}")]
    Reservation(#[from] ReservationError),

    #[error("order error: {0}")]
    Order(#[from] OrderError),

    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Totals of one sweep run, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub holds_released: u64,
    pub holds_skipped: u64,
    pub orders_cancelled: u64,
    pub idempotency_purged: u64,
    pub deferred_orphans: i64,
}

pub struct HoldSweeper {
    pool: PgPool,
    engine: Arc<ReservationEngine>,
    orders: Arc<OrderService>,
    idempotency: Arc<IdempotencyStore>,
    deferred: Arc<DeferredWebhookStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    batch_size: i64,
    payment_window: ChronoDuration,
    /// Identifies this instance on the lease row.
    holder: String,
}

impl HoldSweeper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        engine: Arc<ReservationEngine>,
        orders: Arc<OrderService>,
        idempotency: Arc<IdempotencyStore>,
        deferred: Arc<DeferredWebhookStore>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        Self {
            pool,
            engine,
            orders,
            idempotency,
            deferred,
            clock,
            interval: config.hold_sweep_interval,
            batch_size: config.hold_sweep_batch_size,
            payment_window: ChronoDuration::from_std(config.payment_window)
                .unwrap_or_else(|_| ChronoDuration::minutes(30)),
            holder: Uuid::new_v4().to_string(),
        }
    }

    /// Run the sweep loop until shutdown is signalled. An in-progress batch
    /// finishes the hold it is on, then the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            holder = %self.holder,
            "Hold sweeper starting"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once(&shutdown).await {
                        Ok(Some(report)) => {
                            tracing::info!(
                                holds_released = report.holds_released,
                                holds_skipped = report.holds_skipped,
                                orders_cancelled = report.orders_cancelled,
                                idempotency_purged = report.idempotency_purged,
                                "Sweep complete"
                            );
                            if report.deferred_orphans > 0 {
                                tracing::warn!(
                                    orphans = report.deferred_orphans,
                                    "Deferred webhooks older than 24h with no matching order"
                                );
                            }
                        }
                        Ok(None) => {
                            tracing::debug!("Sweep skipped, lease held elsewhere");
                        }
                        // Store unavailable is recoverable; the next tick retries.
                        Err(e) => {
                            tracing::error!("Sweep run failed: {e}");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("Hold sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// One sweep run. Returns None when the lease is held by another
    /// instance.
    pub async fn run_once(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Option<SweepReport>, SweeperError> {
        if !self.acquire_lease().await? {
            return Ok(None);
        }

        let mut report = SweepReport::default();

        let sweep_result = self.sweep(shutdown, &mut report).await;

        // Best effort; an expired lease is reclaimed by the next acquirer.
        if let Err(e) = self.release_lease().await {
            tracing::warn!("Failed to release sweeper lease: {e}");
        }

        sweep_result?;
        Ok(Some(report))
    }

    async fn sweep(
        &self,
        shutdown: &watch::Receiver<bool>,
        report: &mut SweepReport,
    ) -> Result<(), SweeperError> {
        let now = self.clock.now();

        let expired: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT hold_id
            FROM holds
            WHERE status = $1 AND expires_at <= $2
            ORDER BY expires_at ASC
            LIMIT $3
            "#,
        )
        .bind(HoldStatus::Pending.id())
        .bind(now)
        .bind(self.batch_size)
        .fetch_all(&self.pool)
        .await?;

        for hold_id in expired {
            if *shutdown.borrow() {
                tracing::info!("Shutdown requested, stopping sweep mid-batch");
                return Ok(());
            }

            match self.engine.release(hold_id).await {
                Ok(ReleaseOutcome::Released) => report.holds_released += 1,
                // Consumed between select and release; its stock is settled.
                Ok(_) => report.holds_skipped += 1,
                Err(e) => {
                    tracing::warn!(hold_id = %hold_id, "Failed to release expired hold: {e}");
                }
            }
        }

        report.orders_cancelled = self
            .orders
            .cancel_stale(self.payment_window, self.batch_size)
            .await?;

        report.idempotency_purged = self.idempotency.purge_expired().await?;
        report.deferred_orphans = self
            .deferred
            .count_orphans(now - ChronoDuration::hours(ORPHAN_AGE_HOURS))
            .await?;

        Ok(())
    }

    /// Take the sweep lease: insert it, or steal it if the current one has
    /// expired. Returns false when another live instance holds it.
    async fn acquire_lease(&self) -> Result<bool, SweeperError> {
        let now = self.clock.now();

        let acquired = sqlx::query(
            r#"
            INSERT INTO worker_leases (name, holder, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE
            SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
            WHERE worker_leases.expires_at <= $4
               OR worker_leases.holder = EXCLUDED.holder
            "#,
        )
        .bind(LEASE_NAME)
        .bind(&self.holder)
        .bind(now + ChronoDuration::minutes(LEASE_TTL_MINUTES))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(acquired.rows_affected() > 0)
    }

    async fn release_lease(&self) -> Result<(), SweeperError> {
        sqlx::query("DELETE FROM worker_leases WHERE name = $1 AND holder = $2")
            .bind(LEASE_NAME)
            .bind(&self.holder)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
