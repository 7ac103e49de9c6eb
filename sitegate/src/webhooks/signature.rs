//! Webhook payload signing.
//!
//! Every outbound body is signed with HMAC-SHA256 using the subscription's
//! secret. The hex digest travels in the `X-Signature` header and covers the
//! exact body bytes, so receivers must verify against the raw body they
//! received rather than a re-serialized copy.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this never falls back in practice.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify an `X-Signature` value against a raw body.
///
/// Intended for receivers such as the companion CMS plugin.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        warn!(
            has_secret = !secret.is_empty(),
            has_signature = !signature.is_empty(),
            "webhook_signature_missing_fields"
        );
        return false;
    }

    let expected = sign_payload(secret, body);
    let valid = constant_time_compare(&expected, &signature.to_ascii_lowercase());

    if !valid {
        warn!(
            expected_length = expected.len(),
            actual_length = signature.len(),
            "webhook_signature_mismatch"
        );
    }

    valid
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
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

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"event":"entry.created","timestamp":"2024-01-01T00:00:00.000Z","site_id":"s","data":{}}"#;

    #[test]
    fn test_sign_is_deterministic_hex() {
        let a = sign_payload(SECRET, BODY);
        let b = sign_payload(SECRET, BODY);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_round_trip() {
        let signature = sign_payload(SECRET, BODY);
        assert!(verify_signature(SECRET, BODY, &signature));
        assert!(verify_signature(SECRET, BODY, &signature.to_uppercase()));
    }

    #[test]
    fn test_any_single_byte_mutation_invalidates() {
        let signature = sign_payload(SECRET, BODY);
        for i in 0..BODY.len() {
            let mut mutated = BODY.to_vec();
            mutated[i] ^= 0x01;
            assert!(
                !verify_signature(SECRET, &mutated, &signature),
                "mutation at byte {} still verified",
                i
            );
        }
    }

    #[test]
    fn test_wrong_secret_fails() {
        let signature = sign_payload(SECRET, BODY);
        assert!(!verify_signature("whsec_other", BODY, &signature));
    }

    #[test]
    fn test_verify_missing_fields() {
        assert!(!verify_signature("", BODY, "abc"));
        assert!(!verify_signature(SECRET, BODY, ""));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
