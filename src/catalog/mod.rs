//! Product catalog: the authoritative stock rows.

pub mod models;
pub mod repository;

pub use models::{NewProduct, Product};
pub use repository::ProductRepository;
