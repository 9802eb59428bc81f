//! Deterministic cache key derivation
//!
//! A key identifies one memoized call: the callable descriptor plus its
//! arguments, all reduced to canonical text and digested. Positional
//! arguments are hashed as a sorted set of canonical renderings, so their
//! order never affects the key; keyword arguments are hashed as one
//! canonical map rendering, so their insertion order never affects the key
//! either.

use derpcache_core::canonical::canonical_string;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Everything that feeds the digest for one call
///
/// `annotation` is populated only when the caller asked for the annotation
/// to be folded into the key; an unhashed annotation is pure metadata and
/// never reaches this struct.
#[derive(Debug, Clone, Default)]
pub struct CallKeyEnvelope {
    /// Caller-supplied stable identifier for the callable
    pub callable: String,
    /// Positional arguments, order-insensitive
    pub args: Vec<Value>,
    /// Keyword arguments, key-order-insensitive
    pub kwargs: Map<String, Value>,
    /// Annotation text, present only when it participates in the key
    pub annotation: Option<String>,
}

/// Derive the digest for a call
///
/// The callable descriptor, the annotation (when present), and every
/// positional argument are rendered canonically and collected into a sorted
/// sequence; the keyword mapping is rendered canonically as a whole. The
/// concatenation of the two renderings is fed through SHA-256 and the hex
/// digest truncated to `width` characters.
#[must_use]
pub fn derive_key(envelope: &CallKeyEnvelope, width: usize) -> String {
    let mut parts: Vec<String> = envelope.args.iter().map(canonical_string).collect();
    parts.push(envelope.callable.clone());
    if let Some(annotation) = &envelope.annotation {
        parts.push(annotation.clone());
    }
    parts.sort();

    let args_repr = Value::from(parts).to_string();
    let kwargs_repr = canonical_string(&Value::Object(envelope.kwargs.clone()));

    let digest = Sha256::digest(format!("{args_repr}{kwargs_repr}").as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(width);
    key
}
