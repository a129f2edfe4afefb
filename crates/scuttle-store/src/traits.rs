//! Store traits: the capability interfaces consumed by the node.
//!
//! [`ReplicatedStore`] is the merge strategy a node is generic over.
//! [`ModelBackend`] is the key/value persistence a map strategy sits on.

use async_trait::async_trait;
use scuttle_core::{AcceptPolicy, Sources, Update};
use serde_json::{Map, Value};

use crate::error::Result;

/// A value change produced by applying an update.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub key: String,
    pub value: Value,
}

/// Result of handing an admitted update to a store.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The store changed.
    Applied(Change),
    /// The store already holds a later value for the same key.
    Superseded,
    /// The payload cannot be applied (reserved key, wrong shape).
    Invalid(String),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }
}

/// Merge strategy behind a node.
///
/// Implementations decide how an update maps to a logical key, how it merges
/// with existing state, and which updates a peer still lacks.
#[async_trait]
pub trait ReplicatedStore: Send + Sync + 'static {
    // ─────────────────────────────────────────────────────────────────────────
    // Keys and Policies
    // ─────────────────────────────────────────────────────────────────────────

    /// Logical key of an update, used by accept policies.
    fn key_of(&self, update: &Update) -> Option<String>;

    /// Whether a peer with `policy` wants `update`.
    ///
    /// Updates without a key only pass policies that carry no whitelist.
    fn is_accepted(&self, policy: &AcceptPolicy, update: &Update) -> bool {
        match self.key_of(update) {
            Some(key) => policy.accepts(&key),
            None => policy.whitelist.is_none(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Merge
    // ─────────────────────────────────────────────────────────────────────────

    /// Merge an admitted update into local state.
    async fn apply_update(&self, update: &Update) -> Result<ApplyOutcome>;

    /// Every update not yet known to `peer`, filtered by `accept`, in
    /// canonical order.
    async fn history(&self, peer: &Sources, accept: Option<&AcceptPolicy>) -> Result<Vec<Update>>;

    /// Current state as JSON.
    async fn to_json(&self) -> Result<Value>;
}

/// Key/value persistence for map-shaped stores.
#[async_trait]
pub trait ModelBackend: Send + Sync + 'static {
    /// The update currently stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Update>>;

    /// Store `update` under `key`, replacing any previous entry.
    async fn set(&self, key: &str, update: &Update) -> Result<()>;

    /// Stored updates unknown to `peer` whose key passes `accept`, in
    /// canonical order.
    async fn history(&self, peer: &Sources, accept: Option<&AcceptPolicy>) -> Result<Vec<Update>>;

    /// Keys whose current value is not null.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Key to current value, skipping null values.
    async fn to_json(&self) -> Result<Map<String, Value>>;
}

/// Value part of a `[key, value]` payload.
pub(crate) fn value_of(update: &Update) -> Value {
    update.payload_item(1).cloned().unwrap_or(Value::Null)
}

/// Key part of a `[key, ...]` payload.
pub(crate) fn key_of(update: &Update) -> Option<String> {
    update
        .payload_item(0)
        .and_then(Value::as_str)
        .map(str::to_owned)
}
