//! Order state machine: creation from holds and monotonic transitions.

pub mod error;
pub mod models;
pub mod service;

pub use error::OrderError;
pub use models::{CustomerDetails, Order, OrderStatus, order_id_for_hold};
pub use service::{OrderService, TransitionOutcome};
