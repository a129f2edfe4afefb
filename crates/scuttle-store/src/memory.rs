//! In-memory model backend.
//!
//! Same semantics as the SQLite backend with no persistence. Thread-safe via
//! RwLock.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use scuttle_core::{sort_updates, AcceptPolicy, Sources, Update};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::traits::{value_of, ModelBackend};

/// In-memory key/value backend.
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    entries: RwLock<BTreeMap<String, Update>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Update>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Update>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of stored keys, including null-valued ones.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[async_trait]
impl ModelBackend for MemoryModelStore {
    async fn get(&self, key: &str) -> Result<Option<Update>> {
        Ok(self.read().get(key).cloned())
    }

    async fn set(&self, key: &str, update: &Update) -> Result<()> {
        self.write().insert(key.to_owned(), update.clone());
        Ok(())
    }

    async fn history(&self, peer: &Sources, accept: Option<&AcceptPolicy>) -> Result<Vec<Update>> {
        let mut updates: Vec<Update> = self
            .read()
            .iter()
            .filter(|(key, _)| accept.map_or(true, |policy| policy.accepts(key)))
            .filter(|(_, update)| peer.is_novel(update))
            .map(|(_, update)| update.clone())
            .collect();
        sort_updates(&mut updates);
        Ok(updates)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .read()
            .iter()
            .filter(|(_, update)| !value_of(update).is_null())
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn to_json(&self) -> Result<Map<String, Value>> {
        Ok(self
            .read()
            .iter()
            .map(|(key, update)| (key.clone(), value_of(update)))
            .filter(|(_, value)| !value.is_null())
            .collect())
    }
}
