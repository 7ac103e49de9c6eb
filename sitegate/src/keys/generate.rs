//! API key material generation and hashing.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Leading marker on every issued key.
pub const KEY_MARKER: &str = "sgk_";

/// Random bytes in the display prefix (hex-encoded).
const PREFIX_BYTES: usize = 4;

/// Random bytes in the secret part of the key (hex-encoded).
const SECRET_BYTES: usize = 24;

/// Freshly minted key material.
///
/// `plaintext` must be shown to the creator once and then dropped.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub plaintext: String,
    pub key_hash: String,
    pub key_prefix: String,
}

/// Generate a new key of the form `sgk_<8 hex>-<48 hex>`.
///
/// The part before the dash is the non-secret display prefix.
pub fn generate_api_key() -> GeneratedKey {
    let mut prefix_bytes = [0u8; PREFIX_BYTES];
    let mut secret_bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut prefix_bytes);
    OsRng.fill_bytes(&mut secret_bytes);

    let key_prefix = format!("{}{}", KEY_MARKER, hex::encode(prefix_bytes));
    let plaintext = format!("{}-{}", key_prefix, hex::encode(secret_bytes));
    let key_hash = hash_api_key(&plaintext);

    GeneratedKey {
        plaintext,
        key_hash,
        key_prefix,
    }
}

/// SHA-256 hex digest of a key, the only form ever persisted.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_api_key_format() {
        let key = generate_api_key();

        assert!(key.plaintext.starts_with(KEY_MARKER));
        assert!(key.plaintext.starts_with(&format!("{}-", key.key_prefix)));
        assert_eq!(key.key_prefix.len(), KEY_MARKER.len() + PREFIX_BYTES * 2);
        assert_eq!(
            key.plaintext.len(),
            key.key_prefix.len() + 1 + SECRET_BYTES * 2
        );
    }

    #[test]
    fn test_generated_hash_matches_plaintext() {
        let key = generate_api_key();
        assert_eq!(key.key_hash, hash_api_key(&key.plaintext));
        assert_eq!(key.key_hash.len(), 64);
    }

    #[test]
    fn test_generate_api_key_unique() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a.plaintext, b.plaintext);
        assert_ne!(a.key_hash, b.key_hash);
    }
}
