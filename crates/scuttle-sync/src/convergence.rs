//! Convergence verification.
//!
//! After syncing, two nodes can check they hold the same state by comparing
//! deterministic hashes instead of the full state.

use serde_json::{Map, Value};

use scuttle_core::{canonical_json, AcceptPolicy};
use scuttle_store::ReplicatedStore;

use crate::error::Result;
use crate::node::Node;

const STATE_DOMAIN: &[u8] = b"scuttle-state-v0:";

/// Blake3 hash of the canonical JSON encoding of `state`.
pub fn state_hash(state: &Value) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(STATE_DOMAIN);
    hasher.update(&canonical_json(state));
    *hasher.finalize().as_bytes()
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both nodes hold identical state.
    Converged { state_hash: [u8; 32] },
    /// The states differ (more sync may be needed).
    NotConverged { reason: String },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged { .. })
    }
}

/// Keep only entries both policies let through.
fn shared_view(state: Value, policies: &[Option<&AcceptPolicy>]) -> Value {
    let Value::Object(map) = state else {
        return state;
    };
    let filtered: Map<String, Value> = map
        .into_iter()
        .filter(|(key, _)| policies.iter().flatten().all(|p| p.accepts(key)))
        .collect();
    Value::Object(filtered)
}

/// Compare the state of two nodes.
///
/// Keys excluded by either node's accept policy are ignored, since a
/// filtered node is not expected to hold them.
pub async fn verify_convergence<S: ReplicatedStore>(a: &Node<S>, b: &Node<S>) -> Result<ConvergenceResult> {
    let policies = [a.accept(), b.accept()];
    let left = shared_view(a.snapshot().await?, &policies);
    let right = shared_view(b.snapshot().await?, &policies);

    let left_hash = state_hash(&left);
    let right_hash = state_hash(&right);
    if left_hash != right_hash {
        return Ok(ConvergenceResult::NotConverged {
            reason: format!(
                "state hash mismatch: {} vs {}",
                hex_prefix(&left_hash),
                hex_prefix(&right_hash)
            ),
        });
    }
    Ok(ConvergenceResult::Converged {
        state_hash: left_hash,
    })
}

fn hex_prefix(hash: &[u8; 32]) -> String {
    hash[..4].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeConfig;
    use scuttle_core::SourceId;
    use scuttle_store::LwwMap;
    use serde_json::json;

    #[test]
    fn test_state_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": [1, 2]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": [1, 2], "x": 1}"#).unwrap();
        assert_eq!(state_hash(&a), state_hash(&b));
        assert_ne!(state_hash(&a), state_hash(&json!({"x": 2, "y": [1, 2]})));
    }

    #[tokio::test]
    async fn test_verify_convergence() {
        let a: Node<LwwMap> = Node::with_store(LwwMap::default());
        let b: Node<LwwMap> = Node::new(
            LwwMap::default(),
            NodeConfig::default()
                .with_id(SourceId::new("B").unwrap())
                .with_accept(AcceptPolicy::blacklist(["secret"])),
        );
        assert!(verify_convergence(&a, &b).await.unwrap().is_converged());

        a.local_update(json!(["secret", 1])).await.unwrap();
        assert!(verify_convergence(&a, &b).await.unwrap().is_converged());

        a.local_update(json!(["shared", 1])).await.unwrap();
        assert!(!verify_convergence(&a, &b).await.unwrap().is_converged());
    }
}
