//! Model: a replicated key/value map.
//!
//! Writes are last-writer-wins per key. Writing `null` deletes a key from
//! [`Model::keys`] and [`Model::to_json`] while still replicating the
//! deletion.

use std::path::Path;

use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};

use scuttle_core::{SourceId, Sources, Update, RESERVED_NAME};
use scuttle_store::{LwwMap, MemoryModelStore, ModelBackend, SqliteModelStore};
use scuttle_sync::{Admission, Node, NodeConfig, NodeEvent, Rejection, SessionConfig, SyncSession};

use crate::error::{Result, ScuttleError};

/// Values written to one key of a [`Model`], local and remote.
#[derive(Debug)]
pub struct KeyReceiver {
    key: String,
    rx: broadcast::Receiver<NodeEvent>,
}

impl KeyReceiver {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the next applied value. `Value::Null` is a deletion.
    pub async fn recv(&mut self) -> Result<Value> {
        loop {
            match self.rx.recv().await {
                Ok(NodeEvent::Changed { key, value }) if key == self.key => return Ok(value),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(key = %self.key, skipped, "key receiver lagged");
                }
                Err(RecvError::Closed) => return Err(ScuttleError::ChannelClosed),
            }
        }
    }
}

/// A replicated key/value map.
pub struct Model<B = MemoryModelStore> {
    node: Node<LwwMap<B>>,
}

impl<B> Clone for Model<B> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<B: ModelBackend> std::fmt::Debug for Model<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model").field("id", self.node.id()).finish()
    }
}

impl Model<MemoryModelStore> {
    /// In-memory model.
    pub fn new(config: NodeConfig) -> Self {
        Self::with_backend(MemoryModelStore::new(), config)
    }

    /// In-memory model with the given id.
    pub fn with_id(id: &str) -> Result<Self> {
        Ok(Self::new(NodeConfig::default().with_id(SourceId::new(id)?)))
    }
}

impl Model<SqliteModelStore> {
    /// Model persisted in a SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>, config: NodeConfig) -> Result<Self> {
        Ok(Self::with_backend(SqliteModelStore::open(path)?, config))
    }
}

impl<B: ModelBackend> Model<B> {
    pub fn with_backend(backend: B, config: NodeConfig) -> Self {
        Self {
            node: Node::new(LwwMap::new(backend), config),
        }
    }

    /// The underlying replication node.
    pub fn node(&self) -> &Node<LwwMap<B>> {
        &self.node
    }

    pub fn id(&self) -> &SourceId {
        self.node.id()
    }

    /// Set `key` to `value`.
    ///
    /// The reserved key `__proto__` is refused without touching the clock.
    pub async fn set(&self, key: &str, value: impl Into<Value>) -> Result<Admission> {
        if key == RESERVED_NAME {
            return Ok(self.refuse_reserved());
        }
        let value = value.into();
        tracing::debug!(parent: self.node.span(), key, "set");
        Ok(self.node.local_update(json!([key, value])).await?)
    }

    /// Delete `key` by writing null.
    pub async fn delete(&self, key: &str) -> Result<Admission> {
        self.set(key, Value::Null).await
    }

    /// Current value of `key`.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        if key == RESERVED_NAME {
            self.refuse_reserved();
            return Ok(None);
        }
        Ok(self.node.store().get(key).await?)
    }

    /// The winning update for `key`, with its clock.
    pub async fn get_update(&self, key: &str) -> Result<Option<Update>> {
        if key == RESERVED_NAME {
            self.refuse_reserved();
            return Ok(None);
        }
        Ok(self.node.store().get_update(key).await?)
    }

    /// Keys with a non-null value.
    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.node.store().keys().await?)
    }

    /// Key to value for every non-null entry.
    pub async fn to_json(&self) -> Result<Value> {
        Ok(self.node.snapshot().await?)
    }

    pub fn sources(&self) -> Sources {
        self.node.sources()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.node.subscribe()
    }

    /// Changes to `key` applied from now on.
    pub fn watch(&self, key: &str) -> KeyReceiver {
        KeyReceiver {
            key: key.to_owned(),
            rx: self.node.subscribe(),
        }
    }

    pub fn create_stream(&self, config: SessionConfig) -> SyncSession<LwwMap<B>> {
        self.node.create_stream(config)
    }

    pub fn create_read_stream(&self) -> SyncSession<LwwMap<B>> {
        self.node.create_read_stream()
    }

    pub fn create_write_stream(&self) -> SyncSession<LwwMap<B>> {
        self.node.create_write_stream()
    }

    /// End every open stream.
    pub fn dispose(&self) {
        self.node.dispose();
    }

    /// Copy into `backend` under the same id.
    pub async fn clone_into(&self, backend: B) -> Result<Model<B>> {
        let node = self.node.clone_into(LwwMap::new(backend)).await?;
        Ok(Model { node })
    }

    fn refuse_reserved(&self) -> Admission {
        let reason = format!("{RESERVED_NAME} is not a valid key");
        tracing::warn!(parent: self.node.span(), "{reason}");
        self.node.emit(NodeEvent::Invalid(reason.clone()));
        Admission::Rejected(Rejection::Invalid(reason))
    }
}

impl<B: ModelBackend + Default> Model<B> {
    /// Copy into a fresh backend under the same id.
    pub async fn clone_model(&self) -> Result<Model<B>> {
        self.clone_into(B::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let model = Model::with_id("A").unwrap();
        model.set("foo", "bar").await.unwrap();
        assert_eq!(model.get("foo").await.unwrap(), Some(json!("bar")));
        assert_eq!(model.keys().await.unwrap(), vec!["foo".to_string()]);

        model.delete("foo").await.unwrap();
        assert_eq!(model.get("foo").await.unwrap(), None);
        assert!(model.keys().await.unwrap().is_empty());
        assert_eq!(model.to_json().await.unwrap(), json!({}));
        assert!(model.get_update("foo").await.unwrap().is_some());
    }

    #[test]
    fn test_debug_shows_id() {
        let model = Model::with_id("A").unwrap();
        assert_eq!(format!("{model:?}"), "Model { id: SourceId(A) }");
    }

    #[tokio::test]
    async fn test_watch_sees_only_its_key() {
        let model = Model::with_id("A").unwrap();
        let mut watched = model.watch("a");
        model.set("b", 1).await.unwrap();
        model.set("a", 2).await.unwrap();
        model.delete("a").await.unwrap();
        assert_eq!(watched.key(), "a");
        assert_eq!(watched.recv().await.unwrap(), json!(2));
        assert_eq!(watched.recv().await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_reserved_key_is_refused() {
        let model = Model::with_id("A").unwrap();
        let mut events = model.subscribe();
        let admission = model.set(RESERVED_NAME, 1).await.unwrap();
        assert!(matches!(
            admission,
            Admission::Rejected(Rejection::Invalid(_))
        ));
        assert!(matches!(events.recv().await.unwrap(), NodeEvent::Invalid(_)));
        assert!(model.sources().is_empty());
        assert_eq!(model.get(RESERVED_NAME).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_model_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.db");
        {
            let model = Model::open(&path, NodeConfig::default()).unwrap();
            model.set("k", json!({"n": 1})).await.unwrap();
        }
        let model = Model::open(&path, NodeConfig::default()).unwrap();
        assert_eq!(model.get("k").await.unwrap(), Some(json!({"n": 1})));
    }
}
