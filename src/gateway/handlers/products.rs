//! Product read path: Cache -> Store fallback.

use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::ProductRepository;
use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, ProductResponse, error_codes};

use super::with_deadline;

/// Get a product with its current available stock.
///
/// GET /products/{id}
///
/// The stock figure is served through the cache (30s TTL, single-flight on
/// miss) and may lag the authoritative counter slightly; reservations never
/// rely on it.
#[utoipa::path(
    get,
    path = "/products/{id}",
    params(
        ("id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Product with available stock", body = ProductResponse),
        (status = 404, description = "Product missing or inactive")
    ),
    tag = "Products"
)]
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProductResponse>, ApiError> {
    let pool = state.db.pool();

    let product = with_deadline(state.config.request_timeout, ProductRepository::get(pool, id))
        .await?
        .ok_or_else(|| ApiError::not_found(error_codes::PRODUCT_NOT_FOUND, "product not found"))?;

    if !product.is_active() {
        return Err(ApiError::not_found(
            error_codes::PRODUCT_NOT_FOUND,
            "product not found",
        ));
    }

    let cached = state
        .cache
        .with_singleflight(id, || ProductRepository::available_stock(pool, id))
        .await?;

    Ok(Json(ProductResponse {
        id: product.product_id,
        name: product.name,
        price: product.price,
        initial_stock: product.initial_stock,
        available_stock: cached.unwrap_or(product.available_stock),
        active: product.active,
    }))
}
