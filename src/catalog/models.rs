//! Product entity.
//!
//! Products are inert data plus predicates; all mutation goes through the
//! reservation engine and order machine under row locks.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A sellable product with a fixed stock budget.
///
/// `initial_stock` never changes after creation; `available_stock` is the
/// authoritative counter of unreserved units and always satisfies
/// `0 <= available_stock <= initial_stock`.
#[derive(Debug, Clone)]
pub struct Product {
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub initial_stock: i32,
    pub available_stock: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Whether the product can still satisfy a reservation of `quantity`.
    pub fn has_stock(&self, quantity: i32) -> bool {
        self.available_stock >= quantity
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Seed data for a new product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub price: Decimal,
    pub initial_stock: i32,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(available: i32) -> Product {
        Product {
            product_id: Uuid::new_v4(),
            name: "limited sneaker".to_string(),
            price: Decimal::new(19_999, 2),
            initial_stock: 10,
            available_stock: available,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn has_stock_compares_against_available() {
        let p = product(3);
        assert!(p.has_stock(1));
        assert!(p.has_stock(3));
        assert!(!p.has_stock(4));
    }

    #[test]
    fn zero_stock_satisfies_nothing() {
        let p = product(0);
        assert!(!p.has_stock(1));
    }
}
