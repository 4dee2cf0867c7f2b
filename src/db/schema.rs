//! Schema initialization for the checkout database.
//!
//! Five logical tables carry the core state (products, holds, orders,
//! idempotency_records, deferred_webhooks); failed_webhooks is the dead
//! letter, worker_leases backs the sweeper's at-most-one-instance lock.

use sqlx::PgPool;

/// Create all tables and indexes if they do not exist.
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing checkout schema...");

    for (name, ddl) in STATEMENTS {
        sqlx::query(ddl).execute(pool).await.inspect_err(|e| {
            tracing::error!("Failed to run schema statement {name}: {e}");
        })?;
    }

    tracing::info!("Checkout schema initialized");
    Ok(())
}

const STATEMENTS: &[(&str, &str)] = &[
    ("products", CREATE_PRODUCTS),
    ("holds", CREATE_HOLDS),
    ("holds_status_expires_idx", CREATE_HOLDS_INDEX),
    ("orders", CREATE_ORDERS),
    ("orders_status_created_idx", CREATE_ORDERS_INDEX),
    ("idempotency_records", CREATE_IDEMPOTENCY),
    ("deferred_webhooks", CREATE_DEFERRED),
    ("deferred_webhooks_order_idx", CREATE_DEFERRED_INDEX),
    ("failed_webhooks", CREATE_FAILED),
    ("worker_leases", CREATE_LEASES),
];

const CREATE_PRODUCTS: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    product_id      UUID PRIMARY KEY,
    name            TEXT NOT NULL,
    price           NUMERIC(20, 8) NOT NULL,
    initial_stock   INT NOT NULL CHECK (initial_stock >= 0),
    available_stock INT NOT NULL,
    active          BOOLEAN NOT NULL DEFAULT TRUE,
    created_at      TIMESTAMPTZ NOT NULL,
    CHECK (available_stock >= 0 AND available_stock <= initial_stock)
)
"#;

const CREATE_HOLDS: &str = r#"
CREATE TABLE IF NOT EXISTS holds (
    hold_id     UUID PRIMARY KEY,
    product_id  UUID NOT NULL REFERENCES products (product_id),
    quantity    INT NOT NULL CHECK (quantity >= 1),
    unit_price  NUMERIC(20, 8) NOT NULL,
    session_id  TEXT,
    status      SMALLINT NOT NULL,
    expires_at  TIMESTAMPTZ NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL,
    consumed_at TIMESTAMPTZ
)
"#;

const CREATE_HOLDS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS holds_status_expires_idx ON holds (status, expires_at)
"#;

const CREATE_ORDERS: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    order_id          UUID PRIMARY KEY,
    hold_id           UUID NOT NULL UNIQUE REFERENCES holds (hold_id),
    product_id        UUID NOT NULL REFERENCES products (product_id),
    quantity          INT NOT NULL CHECK (quantity >= 1),
    unit_price        NUMERIC(20, 8) NOT NULL,
    total_amount      NUMERIC(20, 8) NOT NULL,
    status            SMALLINT NOT NULL,
    customer_email    TEXT,
    customer_details  JSONB,
    payment_reference TEXT,
    paid_at           TIMESTAMPTZ,
    cancelled_at      TIMESTAMPTZ,
    created_at        TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_ORDERS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS orders_status_created_idx ON orders (status, created_at)
"#;

const CREATE_IDEMPOTENCY: &str = r#"
CREATE TABLE IF NOT EXISTS idempotency_records (
    key             TEXT NOT NULL,
    resource_type   TEXT NOT NULL,
    fingerprint     TEXT NOT NULL,
    response_status INT,
    response_body   JSONB,
    locked_at       TIMESTAMPTZ NOT NULL,
    completed_at    TIMESTAMPTZ,
    expires_at      TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (key, resource_type)
)
"#;

const CREATE_DEFERRED: &str = r#"
CREATE TABLE IF NOT EXISTS deferred_webhooks (
    id              BIGSERIAL PRIMARY KEY,
    order_id        UUID NOT NULL,
    idempotency_key TEXT NOT NULL,
    payload         JSONB NOT NULL,
    received_at     TIMESTAMPTZ NOT NULL,
    replayed_at     TIMESTAMPTZ
)
"#;

const CREATE_DEFERRED_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS deferred_webhooks_order_idx ON deferred_webhooks (order_id)
"#;

const CREATE_FAILED: &str = r#"
CREATE TABLE IF NOT EXISTS failed_webhooks (
    id              BIGSERIAL PRIMARY KEY,
    order_id        UUID,
    idempotency_key TEXT NOT NULL,
    payload         JSONB NOT NULL,
    error           TEXT NOT NULL,
    attempts        INT NOT NULL,
    parked_at       TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_LEASES: &str = r#"
CREATE TABLE IF NOT EXISTS worker_leases (
    name       TEXT PRIMARY KEY,
    holder     TEXT NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL
)
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_statement_is_idempotent() {
        for (name, ddl) in STATEMENTS {
            assert!(
                ddl.contains("IF NOT EXISTS"),
                "schema statement {name} must be re-runnable"
            );
        }
    }
}
