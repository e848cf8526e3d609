//! Request fingerprints: `hex(SHA-256(canonical-json(projection)))`.
//!
//! The projection lists only the fields that define semantic equivalence of a
//! request. Transport metadata (request ids, timestamps, the idempotency key
//! itself) must stay out of it so that retries hash identically.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Inputs of an idempotent operation.
pub trait Fingerprinted {
    /// The logical fields that make two requests equivalent.
    fn fingerprint_projection(&self) -> Value;

    fn fingerprint(&self) -> String {
        fingerprint(&self.fingerprint_projection())
    }
}

impl Fingerprinted for Value {
    fn fingerprint_projection(&self) -> Value {
        self.clone()
    }
}

/// Hex-encoded SHA-256 over the canonical JSON rendering of `projection`.
pub fn fingerprint(projection: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(projection).as_bytes());
    hex::encode(hasher.finalize())
}

/// JSON rendering with object keys sorted at every depth and no whitespace.
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
