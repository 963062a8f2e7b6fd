//! Canonical JSON encoding and content hashing.
//!
//! Canonical form: keys sorted lexicographically, no insignificant
//! whitespace, numbers in serde_json's shortest round-trip form. Identical
//! payloads therefore always produce identical hashes, which is what makes
//! `raw_data_hash` and the extraction-cache keys stable.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value canonically.
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
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serializes"));
                out.push(':');
                write_canonical(&map[*key], out);
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
        // Scalars already serialize in shortest round-trip form
        other => out.push_str(&serde_json::to_string(other).expect("scalar serializes")),
    }
}

/// SHA-256 of a string, lowercase hex.
pub fn sha256_hex(input: &str) -> String {
    use std::fmt::Write;

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        write!(hex, "{byte:02x}").expect("write to string");
    }
    hex
}

/// SHA-256 over the canonical-JSON encoding of a raw payload.
pub fn hash_raw_payload(raw: &Value) -> String {
    sha256_hex(&canonical_json(raw))
}
