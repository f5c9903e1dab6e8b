//! Content fingerprinting for change detection
//!
//! An entity's payload is reduced to canonical JSON (object keys sorted
//! recursively) and hashed with SHA-256, so the same logical content hashes
//! identically on every device regardless of field ordering. The hash is
//! only a change detector; it is not an integrity check across the wire.

use sha2::{Digest, Sha256};

use moodsync_core::SyncRecord;

/// Hash a record's synchronizable payload.
pub fn hash_record(record: &SyncRecord) -> String {
    hash_value(&record.payload)
}

/// Hash an arbitrary JSON value canonically.
pub fn hash_value(value: &serde_json::Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (index, key) in keys.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                // keys are already valid JSON strings when re-serialized
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
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
    fn hash_is_deterministic() {
        let value = json!({ "title": "Moodboard", "tags": ["a", "b"] });
        assert_eq!(hash_value(&value), hash_value(&value));
    }

    #[test]
    fn hash_ignores_field_order() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"title":"X","notes":"n","nested":{"k":1,"j":2}}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"nested":{"j":2,"k":1},"notes":"n","title":"X"}"#).unwrap();
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn hash_is_sensitive_to_content() {
        let a = json!({ "title": "X" });
        let b = json!({ "title": "Y" });
        assert_ne!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn array_order_matters() {
        // array order is content, not formatting
        let a = json!({ "tags": ["a", "b"] });
        let b = json!({ "tags": ["b", "a"] });
        assert_ne!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn hash_is_hex_sha256() {
        let hash = hash_value(&json!({}));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
