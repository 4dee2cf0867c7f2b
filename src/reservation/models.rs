//! Hold entity and status codes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use uuid::Uuid;

/// Hold lifecycle state.
///
/// A hold is created `Pending` and leaves that state exactly once: to
/// `Consumed` when an order is created from it, or to `Expired` when its
/// lifetime elapses or it is explicitly released. Both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum HoldStatus {
    Pending = 1,
    Consumed = 2,
    Expired = 3,
}

impl HoldStatus {
    /// Numeric ID for PostgreSQL storage.
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL ID.
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(HoldStatus::Pending),
            2 => Some(HoldStatus::Consumed),
            3 => Some(HoldStatus::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Pending => "pending",
            HoldStatus::Consumed => "consumed",
            HoldStatus::Expired => "expired",
        }
    }

    /// Once a hold leaves `Pending`, its state never changes again.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HoldStatus::Pending)
    }
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A transient reservation of product stock with a fixed lifetime.
#[derive(Debug, Clone)]
pub struct Hold {
    pub hold_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    /// Price snapshot taken when the stock was reserved; orders copy this
    /// value rather than re-reading the product.
    pub unit_price: Decimal,
    pub session_id: Option<String>,
    pub status: HoldStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl Hold {
    /// A pending hold past its deadline. Terminal holds are never "expired"
    /// in this sense; their stock accounting is already settled.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Pending && self.expires_at <= now
    }

    /// Usable for order creation.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Pending && self.expires_at > now
    }

    /// Seconds until expiry, clamped at zero.
    pub fn expires_in_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

impl fmt::Display for Hold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Hold[{}] product={} qty={} status={} expires_at={}",
            self.hold_id, self.product_id, self.quantity, self.status, self.expires_at
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hold(status: HoldStatus, expires_in: i64) -> (Hold, DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let hold = Hold {
            hold_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity: 2,
            unit_price: Decimal::new(4_999, 2),
            session_id: None,
            status,
            expires_at: now + chrono::Duration::seconds(expires_in),
            created_at: now,
            consumed_at: None,
        };
        (hold, now)
    }

    #[test]
    fn status_id_roundtrip() {
        for status in [HoldStatus::Pending, HoldStatus::Consumed, HoldStatus::Expired] {
            assert_eq!(HoldStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(HoldStatus::from_id(0), None);
        assert_eq!(HoldStatus::from_id(4), None);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!HoldStatus::Pending.is_terminal());
        assert!(HoldStatus::Consumed.is_terminal());
        assert!(HoldStatus::Expired.is_terminal());
    }

    #[test]
    fn pending_hold_expires_at_deadline() {
        let (h, now) = hold(HoldStatus::Pending, 120);
        assert!(h.is_active(now));
        assert!(!h.is_expired(now));

        let late = now + chrono::Duration::seconds(120);
        assert!(h.is_expired(late));
        assert!(!h.is_active(late));
    }

    #[test]
    fn consumed_hold_is_never_expired() {
        let (h, now) = hold(HoldStatus::Consumed, -60);
        assert!(!h.is_expired(now));
        assert!(!h.is_active(now));
    }

    #[test]
    fn expires_in_seconds_clamps_at_zero() {
        let (h, now) = hold(HoldStatus::Pending, 90);
        assert_eq!(h.expires_in_seconds(now), 90);
        assert_eq!(h.expires_in_seconds(now + chrono::Duration::seconds(200)), 0);
    }
}
