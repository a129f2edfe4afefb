//! Last-writer-wins map.
//!
//! Payloads are `[key, value]`. For each key the update latest in canonical
//! order (timestamp, then source id) wins, whatever order updates arrive in.

use std::cmp::Ordering;

use async_trait::async_trait;
use scuttle_core::{AcceptPolicy, Sources, Update, RESERVED_NAME};
use serde_json::Value;

use crate::error::Result;
use crate::memory::MemoryModelStore;
use crate::traits::{key_of, value_of, ApplyOutcome, Change, ModelBackend, ReplicatedStore};

/// Key/value map replicated with last-writer-wins merge.
#[derive(Debug, Default)]
pub struct LwwMap<B = MemoryModelStore> {
    backend: B,
}

impl<B: ModelBackend> LwwMap<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Current value of `key`; `None` when unset or deleted.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .backend
            .get(key)
            .await?
            .map(|update| value_of(&update))
            .filter(|value| !value.is_null()))
    }

    /// The winning update for `key`.
    pub async fn get_update(&self, key: &str) -> Result<Option<Update>> {
        self.backend.get(key).await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.backend.keys().await
    }
}

#[async_trait]
impl<B: ModelBackend> ReplicatedStore for LwwMap<B> {
    fn key_of(&self, update: &Update) -> Option<String> {
        key_of(update)
    }

    async fn apply_update(&self, update: &Update) -> Result<ApplyOutcome> {
        let Some(key) = key_of(update) else {
            return Ok(ApplyOutcome::Invalid(
                "payload must be a [key, value] array".into(),
            ));
        };
        if key == RESERVED_NAME {
            return Ok(ApplyOutcome::Invalid(format!("reserved key {key:?}")));
        }

        if let Some(current) = self.backend.get(&key).await? {
            if current.canonical_cmp(update) != Ordering::Less {
                return Ok(ApplyOutcome::Superseded);
            }
        }

        let stored = Update {
            forwarded_by: None,
            ..update.clone()
        };
        self.backend.set(&key, &stored).await?;
        Ok(ApplyOutcome::Applied(Change {
            value: value_of(&stored),
            key,
        }))
    }

    async fn history(&self, peer: &Sources, accept: Option<&AcceptPolicy>) -> Result<Vec<Update>> {
        self.backend.history(peer, accept).await
    }

    async fn to_json(&self) -> Result<Value> {
        Ok(Value::Object(self.backend.to_json().await?))
    }
}
