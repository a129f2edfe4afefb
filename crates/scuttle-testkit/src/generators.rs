//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::{json, Value};

use scuttle_core::{AcceptPolicy, SourceId, Timestamp, Update};

/// Keys drawn from a small pool so generated writes collide.
pub const KEYS: &[&str] = &["alpha", "beta", "gamma", "delta", "epsilon"];

/// Generate a valid source id.
pub fn source_id() -> impl Strategy<Value = SourceId> {
    "[A-Z]{1,4}".prop_map(|s| SourceId::new(s).expect("non-empty"))
}

/// Generate one of [`KEYS`].
pub fn key() -> impl Strategy<Value = String> {
    prop::sample::select(KEYS).prop_map(str::to_owned)
}

/// Generate a JSON scalar, null included.
pub fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,12}".prop_map(Value::from),
    ]
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    (1u64..=1_000_000).prop_map(Timestamp)
}

/// Generate a `[key, value]` model update.
pub fn model_update() -> impl Strategy<Value = Update> {
    (key(), scalar(), timestamp(), source_id())
        .prop_map(|(k, v, ts, src)| Update::new(json!([k, v]), ts, src))
}

/// Generate an accept policy over [`KEYS`], or none.
pub fn accept_policy() -> impl Strategy<Value = Option<AcceptPolicy>> {
    let keys = prop::sample::subsequence(KEYS, 0..=KEYS.len());
    prop_oneof![
        Just(None),
        keys.clone().prop_map(|k| Some(AcceptPolicy::whitelist(k))),
        keys.prop_map(|k| Some(AcceptPolicy::blacklist(k))),
    ]
}

/// A local write on one of `nodes` nodes.
#[derive(Debug, Clone)]
pub struct WriteOp {
    pub node: usize,
    pub key: String,
    pub value: Value,
}

/// Generate a sequence of writes spread over `nodes` nodes.
pub fn write_ops(nodes: usize, max_len: usize) -> impl Strategy<Value = Vec<WriteOp>> {
    prop::collection::vec(
        (0..nodes, key(), scalar()).prop_map(|(node, key, value)| WriteOp { node, key, value }),
        0..=max_len,
    )
}
