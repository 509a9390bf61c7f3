//! Canonical JSON hashing
//!
//! Proof fingerprints are SHA-256 over the RFC 8785 (JCS) canonical form of
//! the proof document, so the same proof hashes identically regardless of
//! key order or whitespace in the file it was read from.
//!
//! `serde_json_canonicalizer` handles key ordering, ES6 number formatting
//! and Unicode escaping.

use sha2::{Digest, Sha256};

use crate::domain::Hash256;
use crate::infra::{Result, VcaError};

/// RFC 8785 canonical form of a JSON value
pub fn canonicalize_json(value: &serde_json::Value) -> Result<String> {
    serde_json_canonicalizer::to_string(value)
        .map_err(|e| VcaError::Internal(format!("failed to canonicalize JSON: {e}")))
}

/// SHA-256 of raw bytes
pub fn sha256(bytes: &[u8]) -> Hash256 {
    Sha256::digest(bytes).into()
}

/// SHA-256 of the canonical JSON form of a value
pub fn canonical_json_hash(value: &serde_json::Value) -> Result<Hash256> {
    Ok(sha256(canonicalize_json(value)?.as_bytes()))
}

/// Fingerprint recorded in the ledger in place of the proof itself
pub fn proof_hash(proof: &serde_json::Value) -> Result<Hash256> {
    canonical_json_hash(proof)
}

/// Lowercase hex rendering of a hash
pub fn hash_hex(hash: &Hash256) -> String {
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_key_ordering() {
        let value = json!({
            "zebra": 1,
            "apple": 2,
            "mango": 3
        });

        let canonical = canonicalize_json(&value).unwrap();
        assert_eq!(canonical, r#"{"apple":2,"mango":3,"zebra":1}"#);
    }

    #[test]
    fn test_canonical_json_nested_objects() {
        let value = json!({
            "b": {"d": 1, "c": 2},
            "a": 3
        });

        let canonical = canonicalize_json(&value).unwrap();
        assert_eq!(canonical, r#"{"a":3,"b":{"c":2,"d":1}}"#);
    }

    #[test]
    fn test_proof_hash_ignores_key_order() {
        let a = json!({"pi_a": ["1", "2"], "protocol": "groth16", "curve": "bn128"});
        let b = json!({"curve": "bn128", "protocol": "groth16", "pi_a": ["1", "2"]});
        assert_eq!(proof_hash(&a).unwrap(), proof_hash(&b).unwrap());
    }

    #[test]
    fn test_proof_hash_changes_with_content() {
        let a = json!({"pi_a": ["1", "2"]});
        let b = json!({"pi_a": ["1", "3"]});
        assert_ne!(proof_hash(&a).unwrap(), proof_hash(&b).unwrap());
    }

    #[test]
    fn test_known_digest() {
        // sha256("{}")
        let hash = canonical_json_hash(&json!({})).unwrap();
        assert_eq!(
            hash_hex(&hash),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn test_rfc8785_numbers() {
        assert_eq!(canonicalize_json(&json!(1)).unwrap(), "1");
        assert_eq!(canonicalize_json(&json!(1.5)).unwrap(), "1.5");
        assert_eq!(canonicalize_json(&json!(1.0)).unwrap(), "1");
    }
}
