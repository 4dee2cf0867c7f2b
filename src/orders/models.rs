//! Order entity and the monotonic status machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use uuid::Uuid;

/// Order lifecycle state.
///
/// Transitions are monotonic: `Pending` may move to exactly one of the
/// terminal states, and terminal states are absorbing. A disallowed
/// transition is a no-op that reports the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum OrderStatus {
    Pending = 1,
    Paid = 2,
    Failed = 3,
    Cancelled = 4,
}

impl OrderStatus {
    /// Numeric ID for PostgreSQL storage.
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL ID.
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(OrderStatus::Pending),
            2 => Some(OrderStatus::Paid),
            3 => Some(OrderStatus::Failed),
            4 => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    /// The transition matrix. Only `Pending -> {Paid, Failed, Cancelled}`
    /// is allowed.
    pub fn can_transition(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (
                OrderStatus::Pending,
                OrderStatus::Paid | OrderStatus::Failed | OrderStatus::Cancelled
            )
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Namespace for deriving order ids from hold ids.
///
/// Each hold maps to exactly one order (1:1), so the order id is a UUIDv5
/// of the hold id. Payment intents created against a hold therefore know
/// the order id before the order row exists, which is what lets callbacks
/// that race order creation be parked and absorbed later.
pub const ORDER_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x3e, 0x1c, 0x52, 0xaa, 0x07, 0x44, 0x4d, 0xf2, 0x9b, 0x5e, 0xc1, 0x88, 0x2f, 0x6a, 0xe4,
    0x09,
]);

/// The order id a given hold produces when consumed.
pub fn order_id_for_hold(hold_id: Uuid) -> Uuid {
    Uuid::new_v5(&ORDER_ID_NAMESPACE, hold_id.as_bytes())
}

/// A checkout order created from exactly one consumed hold.
///
/// Quantity and unit price are value snapshots copied from the hold at
/// creation, not live links to the product.
#[derive(Debug, Clone)]
pub struct Order {
    pub order_id: Uuid,
    pub hold_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub customer_email: Option<String>,
    pub customer_details: Option<serde_json::Value>,
    pub payment_reference: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Customer fields accepted at order creation. Recorded on the order,
/// never used in any invariant.
#[derive(Debug, Clone, Default)]
pub struct CustomerDetails {
    pub email: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_id_roundtrip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(OrderStatus::from_id(0), None);
        assert_eq!(OrderStatus::from_id(5), None);
    }

    #[test]
    fn pending_reaches_every_terminal_state() {
        assert!(OrderStatus::Pending.can_transition(OrderStatus::Paid));
        assert!(OrderStatus::Pending.can_transition(OrderStatus::Failed));
        assert!(OrderStatus::Pending.can_transition(OrderStatus::Cancelled));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for terminal in [OrderStatus::Paid, OrderStatus::Failed, OrderStatus::Cancelled] {
            for next in [
                OrderStatus::Pending,
                OrderStatus::Paid,
                OrderStatus::Failed,
                OrderStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition(next), "{terminal} -> {next} must be refused");
            }
        }
    }

    #[test]
    fn pending_cannot_loop() {
        assert!(!OrderStatus::Pending.can_transition(OrderStatus::Pending));
    }

    #[test]
    fn order_id_derivation_is_deterministic() {
        let hold = Uuid::new_v4();
        assert_eq!(order_id_for_hold(hold), order_id_for_hold(hold));
    }

    #[test]
    fn distinct_holds_get_distinct_order_ids() {
        let a = order_id_for_hold(Uuid::new_v4());
        let b = order_id_for_hold(Uuid::new_v4());
        assert_ne!(a, b);
    }
}
