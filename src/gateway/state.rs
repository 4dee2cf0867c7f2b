use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::cache::StockCache;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::db::Database;
use crate::idempotency::IdempotencyStore;
use crate::orders::OrderService;
use crate::reservation::ReservationEngine;
use crate::webhook::WebhookProcessor;

/// Gateway application state (shared).
///
/// Collaborators are constructed once at startup and injected here; no
/// global statics.
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<Database>,
    pub engine: Arc<ReservationEngine>,
    pub orders: Arc<OrderService>,
    pub webhooks: Arc<WebhookProcessor>,
    pub idempotency: Arc<IdempotencyStore>,
    pub cache: Arc<StockCache>,
    pub clock: Arc<dyn Clock>,
    /// Load-shed bound for `POST /holds`; exhaustion answers 429.
    pub reserve_permits: Arc<Semaphore>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<Database>,
        engine: Arc<ReservationEngine>,
        orders: Arc<OrderService>,
        webhooks: Arc<WebhookProcessor>,
        idempotency: Arc<IdempotencyStore>,
        cache: Arc<StockCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reserve_permits = Arc::new(Semaphore::new(config.reserve_max_inflight));
        Self {
            config,
            db,
            engine,
            orders,
            webhooks,
            idempotency,
            cache,
            clock,
            reserve_permits,
        }
    }
}
