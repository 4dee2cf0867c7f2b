use thiserror::Error;
use uuid::Uuid;

use crate::db::DeadlockAware;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("hold {0} not found")]
    HoldMissing(Uuid),

    #[error("hold {0} has expired")]
    HoldExpired(Uuid),

    #[error("hold {0} was already consumed")]
    HoldAlreadyConsumed(Uuid),

    #[error("order {0} not found")]
    OrderMissing(Uuid),

    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),
}

impl DeadlockAware for OrderError {
    fn is_deadlock(&self) -> bool {
        match self {
            OrderError::Store(e) => e.is_deadlock(),
            _ => false,
        }
    }
}
