//! Canonical byte encodings.
//!
//! Signatures and state hashes must be computed over identical bytes on every
//! replica. JSON objects are encoded with keys in sorted order (serde_json's
//! default map is a `BTreeMap`) and without insignificant whitespace.

use serde_json::Value;

use crate::update::Update;

/// Canonical JSON encoding of an arbitrary value.
pub fn canonical_json(value: &Value) -> Vec<u8> {
    // Serializing a `Value` cannot fail: every key is already a string.
    serde_json::to_vec(value).unwrap_or_default()
}

/// Bytes covered by an update signature: `[payload, timestamp, source]`.
///
/// `forwarded_by` is excluded because it changes on every hop.
pub fn signed_message(update: &Update) -> Vec<u8> {
    let message = Value::Array(vec![
        update.payload.clone(),
        Value::from(update.timestamp.as_micros()),
        Value::from(update.source.as_str()),
    ]);
    canonical_json(&message)
}
