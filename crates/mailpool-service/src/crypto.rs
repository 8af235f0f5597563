//! Signature verification for payment-platform callbacks.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over a message and return it hex-encoded.
///
/// # Panics
///
/// Never panics in practice: HMAC-SHA256 accepts keys of any size per
/// RFC 2104, so `new_from_slice` cannot fail.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Check a payment callback signature.
///
/// The platform signs the canonical string
/// `order_no=<order_no>&transaction_id=<transaction_id>` with the shared
/// secret and sends the hex digest in the callback body.
#[must_use]
pub fn verify_callback_signature(
    secret: &str,
    order_no: &str,
    transaction_id: &str,
    presented: &str,
) -> bool {
    let message = format!("order_no={order_no}&transaction_id={transaction_id}");
    constant_time_eq(&hmac_sha256_hex(secret, &message), presented)
}

/// Constant-time string comparison for signature and key checks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_is_deterministic_and_64_hex_chars() {
        let a = hmac_sha256_hex("secret", "message");
        let b = hmac_sha256_hex("secret", "message");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hmac_sha256_hex("secret", "other"));
    }

    #[test]
    fn callback_signature_roundtrip() {
        let sig = hmac_sha256_hex("s3cr3t", "order_no=ORD1&transaction_id=txn-9");
        assert!(verify_callback_signature("s3cr3t", "ORD1", "txn-9", &sig));
        assert!(!verify_callback_signature("s3cr3t", "ORD1", "txn-8", &sig));
        assert!(!verify_callback_signature("wrong", "ORD1", "txn-9", &sig));
    }

    #[test]
    fn constant_time_eq_cases() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }
}
