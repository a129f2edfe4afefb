//! Golden wire vectors.
//!
//! Every implementation of the protocol must classify these frames the same
//! way and re-encode them to the same canonical JSON.

use scuttle_core::{canonical_json, signed_message, Keypair, SourceId, Timestamp, Update};
use scuttle_sync::Frame;

/// A golden wire vector.
#[derive(Debug, Clone)]
pub struct WireVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Canonical JSON of the frame.
    pub json: &'static str,
    /// Expected frame kind.
    pub kind: &'static str,
}

/// Get all wire vectors.
pub fn all_vectors() -> Vec<WireVector> {
    vec![
        WireVector {
            name: "model update",
            json: r#"[["foo","bar"],1000,"A"]"#,
            kind: "update",
        },
        WireVector {
            name: "forwarded update",
            json: r#"[["foo","bar"],1000,"A","B"]"#,
            kind: "update",
        },
        WireVector {
            name: "signed update, not forwarded",
            json: r#"[["foo",{"n":1}],1000,"A",null,"abcd"]"#,
            kind: "update",
        },
        WireVector {
            name: "event with no arguments",
            json: r#"[["tick"],5,"A"]"#,
            kind: "update",
        },
        WireVector {
            name: "sync token",
            json: r#""SYNC""#,
            kind: "sync",
        },
        WireVector {
            name: "digest",
            json: r#"{"clock":{"A":1000,"B":5},"id":"A"}"#,
            kind: "digest",
        },
        WireVector {
            name: "digest with accept and meta",
            json: r#"{"accept":{"whitelist":["foo"]},"clock":{},"id":"B","meta":{"role":"mirror"}}"#,
            kind: "digest",
        },
    ]
}

/// Decode a vector, check its kind and that it re-encodes byte for byte.
pub fn verify_vector(vector: &WireVector) -> Result<(), String> {
    let value: serde_json::Value =
        serde_json::from_str(vector.json).map_err(|e| format!("{}: {e}", vector.name))?;
    let frame = Frame::from_value(value).map_err(|e| format!("{}: {e}", vector.name))?;
    if frame.kind() != vector.kind {
        return Err(format!(
            "{}: expected {}, got {}",
            vector.name,
            vector.kind,
            frame.kind()
        ));
    }
    let value = frame.to_value().map_err(|e| format!("{}: {e}", vector.name))?;
    let encoded = canonical_json(&value);
    if encoded != vector.json.as_bytes() {
        return Err(format!(
            "{}: re-encoded as {}",
            vector.name,
            String::from_utf8_lossy(&encoded)
        ));
    }
    Ok(())
}

/// Verify all vectors, returning the failures.
pub fn verify_all_vectors() -> Vec<String> {
    all_vectors()
        .iter()
        .filter_map(|v| verify_vector(v).err())
        .collect()
}

/// A signed update built from a fixed seed.
#[derive(Debug, Clone)]
pub struct SigningVector {
    pub name: &'static str,
    pub seed: [u8; 32],
    pub payload: serde_json::Value,
    pub timestamp: u64,
}

/// Get all signing vectors.
pub fn signing_vectors() -> Vec<SigningVector> {
    vec![
        SigningVector {
            name: "model write",
            seed: [0x42; 32],
            payload: serde_json::json!(["foo", "bar"]),
            timestamp: 1_736_870_400_000_000,
        },
        SigningVector {
            name: "event with nested args",
            seed: [0x07; 32],
            payload: serde_json::json!(["joined", {"user": "ann", "tags": ["a", "b"]}]),
            timestamp: 1,
        },
    ]
}

/// Build and sign the update described by `vector`.
pub fn signed_update_from_vector(vector: &SigningVector) -> (Keypair, Update) {
    let keys = Keypair::from_seed(&vector.seed);
    let source: SourceId = keys.source_id();
    let mut update = Update::new(vector.payload.clone(), Timestamp(vector.timestamp), source);
    let message = signed_message(&update);
    update.signature = Some(keys.sign_bytes(&message));
    (keys, update)
}
