//! Canonical normalization of JSON-like argument trees
//!
//! Cache keys must not depend on the insertion order of map keys, so every
//! argument value is normalized before it is rendered and hashed. Maps are
//! rewritten with their keys sorted, recursively and depth-first; sequences
//! keep their original element order (callers that want order-independent
//! sequence arguments must sort them before passing them in); strings are
//! atomic and never decomposed; remaining scalars pass through unchanged.

use serde_json::{Map, Value};

/// Normalize a value tree so structurally equal values compare identically.
///
/// Two maps holding the same key/value pairs in different insertion order
/// canonicalize to the same `Value`, however deeply they are nested.
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(entries) => {
            let mut pairs: Vec<(&String, &Value)> = entries.iter().collect();
            pairs.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = Map::new();
            for (key, val) in pairs {
                sorted.insert(key.clone(), canonicalize(val));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        scalar => scalar.clone(),
    }
}

/// Render a value to its stable textual form.
///
/// The rendering of two values that canonicalize equal is byte-identical,
/// which is what makes the digest over it deterministic.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    canonicalize(value).to_string()
}
