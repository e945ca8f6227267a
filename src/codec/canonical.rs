//! Deterministic JSON text for JSON-canonicalized fields.
//!
//! Object keys are emitted in sorted order at every depth and no insignificant whitespace is
//! written, so the same document always produces the same text regardless of how it was
//! formatted on disk.

use crate::error::BuildError;
use serde_json::{Map, Value};

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Canonical text of a JSON value.
pub fn canonical_json(value: &Value) -> Result<String, BuildError> {
    Ok(serde_json::to_string(&sort_keys(value))?)
}

/// Canonicalize a field value in place.
///
/// Structured values are serialized; strings holding JSON are re-serialized; strings that are
/// not JSON are left untouched. Returns whether the value changed.
pub fn canonicalize_field(value: &mut Value) -> Result<bool, BuildError> {
    let canonical = match &*value {
        Value::Null => return Ok(false),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed) => canonical_json(&parsed)?,
            Err(_) => return Ok(false),
        },
        other => canonical_json(other)?,
    };
    let changed = value.as_str() != Some(canonical.as_str());
    *value = Value::String(canonical);
    Ok(changed)
}
