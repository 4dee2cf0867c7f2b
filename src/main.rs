//! Flash-sale checkout service entry point.
//!
//! Startup order matters: config, logging, store (with retry), schema,
//! collaborators, sweeper, gateway. Collaborators are built once here and
//! injected; nothing reaches for globals.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use flashsale::cache::StockCache;
use flashsale::clock::{Clock, SystemClock};
use flashsale::config::AppConfig;
use flashsale::db::{Database, init_schema};
use flashsale::gateway::{self, state::AppState};
use flashsale::idempotency::IdempotencyStore;
use flashsale::logging::init_logging;
use flashsale::orders::OrderService;
use flashsale::reservation::{HoldSweeper, ReservationEngine};
use flashsale::webhook::{DeferredWebhookStore, WebhookProcessor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(AppConfig::from_env());
    let _log_guard = init_logging(&config);

    tracing::info!(
        port = config.port,
        hold_ttl_secs = config.hold_ttl.as_secs(),
        sweep_interval_secs = config.hold_sweep_interval.as_secs(),
        "Starting flash-sale checkout service"
    );

    if config.webhook_verify_signature && config.webhook_hmac_secret.is_empty() {
        anyhow::bail!(
            "WEBHOOK_HMAC_SECRET must be set when signature verification is enabled; \
             set WEBHOOK_VERIFY_SIGNATURE=false only for tests"
        );
    }

    let db = Arc::new(connect_with_retry(&config).await?);
    init_schema(db.pool()).await?;

    // Collaborators, leaves first.
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = Arc::new(StockCache::new(config.stock_cache_ttl));
    let engine = Arc::new(ReservationEngine::new(
        db.pool().clone(),
        cache.clone(),
        clock.clone(),
        &config,
    ));
    let orders = Arc::new(OrderService::new(
        db.pool().clone(),
        cache.clone(),
        clock.clone(),
        &config,
    ));
    let idempotency = Arc::new(IdempotencyStore::new(db.pool().clone(), clock.clone()));
    let deferred = Arc::new(DeferredWebhookStore::new(db.pool().clone()));
    let webhooks = Arc::new(WebhookProcessor::new(
        db.pool().clone(),
        idempotency.clone(),
        deferred.clone(),
        orders.clone(),
        clock.clone(),
        &config,
    ));

    // Lifecycle sweeper on its own worker loop.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = HoldSweeper::new(
        db.pool().clone(),
        engine.clone(),
        orders.clone(),
        idempotency.clone(),
        deferred.clone(),
        clock.clone(),
        &config,
    );
    let sweeper_shutdown = shutdown_rx.clone();
    let sweeper_handle = tokio::spawn(async move {
        sweeper.run(sweeper_shutdown).await;
    });

    // Translate Ctrl-C into the shared shutdown signal.
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = ctrl_c_tx.send(true);
        }
    });

    let state = Arc::new(AppState::new(
        config.clone(),
        db,
        engine,
        orders,
        webhooks,
        idempotency,
        cache,
        clock,
    ));

    gateway::run_server(config.port, state, shutdown_rx).await?;

    // Drain window: one hold-processing cycle for the sweeper to finish
    // the hold it is on.
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(config.hold_sweep_interval, sweeper_handle)
        .await
        .is_err()
    {
        tracing::warn!("Sweeper did not drain within one cycle, exiting anyway");
    }

    tracing::info!("Service stopped");
    Ok(())
}

/// Connect to PostgreSQL with exponential backoff. The store being briefly
/// unavailable at boot (container orchestration) is normal.
async fn connect_with_retry(config: &AppConfig) -> anyhow::Result<Database> {
    const MAX_ATTEMPTS: u32 = 10;
    let mut delay = Duration::from_secs(1);

    for attempt in 1..=MAX_ATTEMPTS {
        match Database::connect(&config.database_url, config.pg_pool_size).await {
            Ok(db) => {
                tracing::info!(attempt, "Connected to PostgreSQL");
                return Ok(db);
            }
            Err(e) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "PostgreSQL connection failed, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(30));
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "failed to connect to PostgreSQL after {MAX_ATTEMPTS} attempts: {e}"
                ));
            }
        }
    }

    unreachable!("loop either returns or errors on the last attempt")
}
