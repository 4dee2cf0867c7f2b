//! Webhook signature verification.
//!
//! HMAC-SHA256 over the raw request body with a preshared secret. The
//! comparison is constant-time via the `Mac` verify path.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Whether signatures are enforced. Disabled only in test environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMode {
    Required,
    Disabled,
}

/// Hex-encoded HMAC-SHA256 of `body`. Used by tests and tooling to build
/// valid callbacks.
pub fn compute_signature(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature against the raw body. A `sha256=` prefix is
/// tolerated, matching common gateway conventions.
pub fn verify_signature(secret: &[u8], body: &[u8], provided: &str) -> bool {
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);

    let Ok(expected) = hex::decode(provided) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-webhook-secret";

    #[test]
    fn roundtrip_verifies() {
        let body = br#"{"order_id":"x","status":"success"}"#;
        let sig = compute_signature(SECRET, body);
        assert!(verify_signature(SECRET, body, &sig));
    }

    #[test]
    fn prefixed_signature_verifies() {
        let body = b"payload";
        let sig = format!("sha256={}", compute_signature(SECRET, body));
        assert!(verify_signature(SECRET, body, &sig));
    }

    #[test]
    fn tampered_body_fails() {
        let sig = compute_signature(SECRET, b"original");
        assert!(!verify_signature(SECRET, b"tampered", &sig));
    }

    #[test]
    fn wrong_secret_fails() {
        let sig = compute_signature(b"other-secret", b"body");
        assert!(!verify_signature(SECRET, b"body", &sig));
    }

    #[test]
    fn garbage_signature_fails() {
        assert!(!verify_signature(SECRET, b"body", "not-hex!"));
        assert!(!verify_signature(SECRET, b"body", ""));
    }
}
