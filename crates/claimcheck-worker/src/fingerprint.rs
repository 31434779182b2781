//! Deterministic job fingerprints used for deduplication.
//!
//! A fingerprint is the SHA-256 (hex) of the trimmed job type and the
//! canonical JSON form of the payload (object keys sorted at every level, no
//! whitespace). The job type is length-prefixed so the concatenation is
//! unambiguous.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Fingerprint a JSON payload.
pub fn fingerprint_value(job_type: &str, payload: &Value) -> String {
    let job_type = job_type.trim();
    let canonical = if payload.is_null() {
        "{}".to_string()
    } else {
        canonical_json(payload)
    };

    let mut hasher = Sha256::new();
    hasher.update(job_type.len().to_string().as_bytes());
    hasher.update(b":");
    hasher.update(job_type.as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Render `value` as compact JSON with object keys sorted.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"d": [2, {"z": true, "y": null}], "c": "é"}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":"é","d":[2,{"y":null,"z":true}]},"b":1}"#
        );
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint_value("summarize", &json!({"episode_id": 1}));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_job_type_and_payload_both_matter() {
        let payload = json!({"episode_id": 1});
        assert_ne!(
            fingerprint_value("summarize", &payload),
            fingerprint_value("extract_claims", &payload)
        );
        assert_ne!(
            fingerprint_value("summarize", &payload),
            fingerprint_value("summarize", &json!({"episode_id": 2}))
        );
    }

    #[test]
    fn test_job_type_is_trimmed() {
        let payload = json!({"episode_id": 1});
        assert_eq!(
            fingerprint_value(" summarize ", &payload),
            fingerprint_value("summarize", &payload)
        );
    }

    #[test]
    fn test_null_payload_matches_empty_object() {
        assert_eq!(
            fingerprint_value("auto_grade", &Value::Null),
            fingerprint_value("auto_grade", &json!({}))
        );
    }

    #[test]
    fn test_separator_is_unambiguous() {
        assert_ne!(
            fingerprint_value("a", &json!("b:{}")),
            fingerprint_value("a:\"b", &json!({}))
        );
    }

    proptest! {
        #[test]
        fn fingerprint_ignores_key_insertion_order(
            entries in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 1..12)
        ) {
            let forward: Map<String, Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            let backward: Map<String, Value> = entries
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();

            prop_assert_eq!(
                fingerprint_value("summarize", &Value::Object(forward)),
                fingerprint_value("summarize", &Value::Object(backward))
            );
        }
    }
}
