//! Canonical JSON and content hashes.
//!
//! Canonical form: object keys sorted, no insignificant whitespace, numbers
//! and strings rendered by `serde_json`. Hashes are SHA-256 over those bytes,
//! lower-case hex, behind a versioned prefix (`plan1_`, `graph1_`).

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const PLAN_HASH_PREFIX: &str = "plan1_";
pub const GRAPH_HASH_PREFIX: &str = "graph1_";

pub fn canonical_json_bytes(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), serde_json::Error> {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            serde_json::to_writer(&mut *out, value)?;
        }
        Value::Array(items) => {
            out.push(b'[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push(b'{');
            for (idx, (key, item)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(item, out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

/// Canonical JSON text of any serializable value.
pub fn canonical_string<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = canonical_json_bytes(&serde_json::to_value(value)?)?;
    // Built only from serde_json output and ASCII punctuation.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// `<prefix><sha256 hex>` over the canonical form of `value`.
pub fn content_hash<T: Serialize>(prefix: &str, value: &T) -> Result<String, serde_json::Error> {
    let bytes = canonical_json_bytes(&serde_json::to_value(value)?)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{prefix}{}", hex::encode(digest)))
}
