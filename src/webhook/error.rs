use thiserror::Error;

use crate::db::DeadlockAware;
use crate::orders::OrderError;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing Idempotency-Key")]
    MissingKey,

    #[error("missing webhook signature")]
    SignatureMissing,

    #[error("invalid webhook signature")]
    SignatureInvalid,

    #[error("{0}")]
    Validation(String),

    #[error("idempotency key reused with a different payload")]
    KeyReuse,

    #[error("this idempotency key is being processed concurrently")]
    InFlight,

    #[error("order error: {0}")]
    Order(#[from] OrderError),

    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),
}

impl DeadlockAware for WebhookError {
    fn is_deadlock(&self) -> bool {
        match self {
            WebhookError::Store(e) => e.is_deadlock(),
            WebhookError::Order(e) => e.is_deadlock(),
            _ => false,
        }
    }
}
