use thiserror::Error;
use uuid::Uuid;

use crate::db::DeadlockAware;

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("product {0} not found")]
    ProductMissing(Uuid),

    #[error("product {0} is not active")]
    ProductInactive(Uuid),

    #[error(
        "insufficient stock for product {product_id}: {available} available, {requested} requested"
    )]
    InsufficientStock {
        product_id: Uuid,
        available: i32,
        requested: i32,
    },

    #[error("quantity must be at least 1, got {0}")]
    InvalidQuantity(i32),

    #[error("hold {0} not found")]
    HoldMissing(Uuid),

    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),
}

impl DeadlockAware for ReservationError {
    fn is_deadlock(&self) -> bool {
        match self {
            ReservationError::Store(e) => e.is_deadlock(),
            _ => false,
        }
    }
}
