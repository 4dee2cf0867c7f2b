//! Payment callback payload.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Gateway-reported payment result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Success,
    Failed,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Success => "success",
            PaymentOutcome::Failed => "failed",
        }
    }
}

/// The fields the processor recognizes. Everything but `metadata` is
/// required; unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WebhookPayload {
    pub order_id: Uuid,
    pub status: PaymentOutcome,
    #[validate(length(min = 1, max = 255))]
    pub payment_reference: String,
    pub amount: Decimal,
    #[validate(length(equal = 3))]
    pub currency: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl WebhookPayload {
    /// Parse and validate a raw callback body.
    pub fn parse(raw: &[u8]) -> Result<Self, String> {
        let payload: WebhookPayload =
            serde_json::from_slice(raw).map_err(|e| format!("malformed payload: {e}"))?;
        payload
            .validate()
            .map_err(|e| format!("invalid payload: {e}"))?;
        if payload.amount.is_sign_negative() || payload.amount.is_zero() {
            return Err(format!("invalid payload: amount {} is not positive", payload.amount));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_body() -> serde_json::Value {
        serde_json::json!({
            "order_id": "7b2e9d8c-3f41-4a6b-9c5d-1e8f7a6b5c4d",
            "status": "success",
            "payment_reference": "pay_123",
            "amount": "199.99",
            "currency": "EUR",
            "timestamp": "2025-06-01T12:00:00Z"
        })
    }

    #[test]
    fn parses_a_valid_payload() {
        let body = serde_json::to_vec(&valid_body()).unwrap();
        let payload = WebhookPayload::parse(&body).unwrap();
        assert_eq!(payload.status, PaymentOutcome::Success);
        assert_eq!(payload.payment_reference, "pay_123");
        assert_eq!(payload.currency, "EUR");
        assert!(payload.metadata.is_none());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let mut body = valid_body();
        body["status"] = "refunded".into();
        let raw = serde_json::to_vec(&body).unwrap();
        assert!(WebhookPayload::parse(&raw).is_err());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let mut body = valid_body();
        body.as_object_mut().unwrap().remove("payment_reference");
        let raw = serde_json::to_vec(&body).unwrap();
        assert!(WebhookPayload::parse(&raw).is_err());
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        for bad in ["0", "-5.00"] {
            let mut body = valid_body();
            body["amount"] = bad.into();
            let raw = serde_json::to_vec(&body).unwrap();
            assert!(WebhookPayload::parse(&raw).is_err(), "amount {bad} must fail");
        }
    }

    #[test]
    fn currency_must_be_three_chars() {
        let mut body = valid_body();
        body["currency"] = "EURO".into();
        let raw = serde_json::to_vec(&body).unwrap();
        assert!(WebhookPayload::parse(&raw).is_err());
    }

    #[test]
    fn metadata_is_optional_and_roundtrips() {
        let mut body = valid_body();
        body["metadata"] = serde_json::json!({"attempt": 2});
        let raw = serde_json::to_vec(&body).unwrap();
        let payload = WebhookPayload::parse(&raw).unwrap();
        assert_eq!(payload.metadata.unwrap()["attempt"], 2);
    }
}
