//! Stock reservation: holds, the reservation engine, and the lifecycle
//! sweeper.

pub mod engine;
pub mod error;
pub mod models;
pub mod sweeper;

pub use engine::{ReleaseOutcome, ReservationEngine};
pub use error::ReservationError;
pub use models::{Hold, HoldStatus};
pub use sweeper::HoldSweeper;
