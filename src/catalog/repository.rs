//! Repository layer for product rows.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::models::{NewProduct, Product};

/// Product repository for read paths and seeding.
///
/// Stock mutation lives in the reservation engine and order machine; this
/// repository never takes row locks.
pub struct ProductRepository;

impl ProductRepository {
    /// Get a product by ID.
    pub async fn get(pool: &PgPool, product_id: Uuid) -> Result<Option<Product>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT product_id, name, price, initial_stock, available_stock, active, created_at
            FROM products
            WHERE product_id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|r| row_to_product(&r)))
    }

    /// Read only the authoritative available-stock counter.
    ///
    /// This is the loader behind the stock cache; returns None for unknown
    /// products.
    pub async fn available_stock(
        pool: &PgPool,
        product_id: Uuid,
    ) -> Result<Option<i32>, sqlx::Error> {
        sqlx::query_scalar::<_, i32>(
            "SELECT available_stock FROM products WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_optional(pool)
        .await
    }

    /// Create a product with its full stock budget available.
    pub async fn create(
        pool: &PgPool,
        new: &NewProduct,
        now: DateTime<Utc>,
    ) -> Result<Product, sqlx::Error> {
        let product_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO products
                (product_id, name, price, initial_stock, available_stock, active, created_at)
            VALUES
                ($1, $2, $3, $4, $4, $5, $6)
            "#,
        )
        .bind(product_id)
        .bind(&new.name)
        .bind(new.price)
        .bind(new.initial_stock)
        .bind(new.active)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(Product {
            product_id,
            name: new.name.clone(),
            price: new.price,
            initial_stock: new.initial_stock,
            available_stock: new.initial_stock,
            active: new.active,
            created_at: now,
        })
    }

    /// Recompute availability from first principles:
    /// `initial_stock - pending unexpired holds - consumed holds whose order
    /// is not cancelled or failed`.
    ///
    /// Equivalent to `available_stock` whenever the conservation invariant
    /// holds; used by read-path verification and the scenario tests.
    pub async fn derived_available(
        pool: &PgPool,
        product_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, sqlx::Error> {
        use crate::orders::OrderStatus;
        use crate::reservation::HoldStatus;

        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT p.initial_stock::BIGINT
                 - COALESCE((
                       SELECT SUM(h.quantity)
                       FROM holds h
                       WHERE h.product_id = p.product_id
                         AND h.status = $3
                         AND h.expires_at > $2
                   ), 0)
                 - COALESCE((
                       SELECT SUM(h.quantity)
                       FROM holds h
                       JOIN orders o ON o.hold_id = h.hold_id
                       WHERE h.product_id = p.product_id
                         AND h.status = $4
                         AND o.status NOT IN ($5, $6)
                   ), 0)
            FROM products p
            WHERE p.product_id = $1
            "#,
        )
        .bind(product_id)
        .bind(now)
        .bind(HoldStatus::Pending.id())
        .bind(HoldStatus::Consumed.id())
        .bind(OrderStatus::Failed.id())
        .bind(OrderStatus::Cancelled.id())
        .fetch_optional(pool)
        .await
    }
}

fn row_to_product(row: &PgRow) -> Product {
    Product {
        product_id: row.get("product_id"),
        name: row.get("name"),
        price: row.get("price"),
        initial_stock: row.get("initial_stock"),
        available_stock: row.get("available_stock"),
        active: row.get("active"),
        created_at: row.get("created_at"),
    }
}
