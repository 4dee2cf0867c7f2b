//! Idempotent payment webhook processing.

pub mod deferred;
pub mod error;
pub mod payload;
pub mod processor;
pub mod signature;

pub use deferred::{DeferredWebhook, DeferredWebhookStore};
pub use error::WebhookError;
pub use payload::{PaymentOutcome, WebhookPayload};
pub use processor::{ProcessResponse, WebhookProcessor};
pub use signature::SignatureMode;
