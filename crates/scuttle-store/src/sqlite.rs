//! SQLite model backend.
//!
//! Persists the winning update of every key. Uses rusqlite with bundled
//! SQLite, wrapped in async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use scuttle_core::{sort_updates, AcceptPolicy, SourceId, Sources, Timestamp, Update};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{value_of, ModelBackend};

/// SQLite-backed key/value backend.
///
/// Thread-safe via an internal Mutex; every query runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteModelStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteModelStore {
    /// Open a database file, creating and migrating it as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            f(&guard)
        })
        .await?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| {
        StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            Some(format!("mutex poisoned: {}", e)),
        ))
    })
}

/// Raw columns of an `entries` row.
struct EntryRow {
    key: String,
    payload: String,
    timestamp: i64,
    source: String,
    signature: Option<String>,
}

impl EntryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get("key")?,
            payload: row.get("payload")?,
            timestamp: row.get("timestamp")?,
            source: row.get("source")?,
            signature: row.get("signature")?,
        })
    }

    fn into_update(self) -> Result<(String, Update)> {
        let payload: Value = serde_json::from_str(&self.payload)?;
        let timestamp = u64::try_from(self.timestamp)
            .map_err(|_| StoreError::InvalidData(format!("negative timestamp for {}", self.key)))?;
        let source = SourceId::new(self.source)?;
        let mut update = Update::new(payload, Timestamp(timestamp), source);
        update.signature = self.signature;
        Ok((self.key, update))
    }
}

const SELECT_ENTRIES: &str =
    "SELECT key, payload, timestamp, source, signature FROM entries ORDER BY key";

fn load_all(conn: &Connection) -> Result<Vec<(String, Update)>> {
    let mut stmt = conn.prepare(SELECT_ENTRIES)?;
    let rows = stmt
        .query_map([], EntryRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(EntryRow::into_update).collect()
}

#[async_trait]
impl ModelBackend for SqliteModelStore {
    async fn get(&self, key: &str) -> Result<Option<Update>> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT key, payload, timestamp, source, signature FROM entries WHERE key = ?1",
                    params![key],
                    EntryRow::from_row,
                )
                .optional()?;
            row.map(|r| r.into_update().map(|(_, u)| u)).transpose()
        })
        .await
    }

    async fn set(&self, key: &str, update: &Update) -> Result<()> {
        let key = key.to_owned();
        let payload = serde_json::to_string(&update.payload)?;
        let value = serde_json::to_string(&value_of(update))?;
        let timestamp = i64::try_from(update.timestamp.as_micros())
            .map_err(|_| StoreError::InvalidData("timestamp out of range".into()))?;
        let source = update.source.to_string();
        let signature = update.signature.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO entries (key, payload, value, timestamp, source, signature, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(key) DO UPDATE SET
                    payload = excluded.payload,
                    value = excluded.value,
                    timestamp = excluded.timestamp,
                    source = excluded.source,
                    signature = excluded.signature,
                    updated_at = excluded.updated_at",
                params![key, payload, value, timestamp, source, signature, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn history(&self, peer: &Sources, accept: Option<&AcceptPolicy>) -> Result<Vec<Update>> {
        let peer = peer.clone();
        let accept = accept.cloned();
        self.with_conn(move |conn| {
            let mut updates: Vec<Update> = load_all(conn)?
                .into_iter()
                .filter(|(key, _)| accept.as_ref().map_or(true, |p| p.accepts(key)))
                .map(|(_, update)| update)
                .filter(|update| peer.is_novel(update))
                .collect();
            sort_updates(&mut updates);
            Ok(updates)
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM entries WHERE value <> 'null' ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn to_json(&self) -> Result<Map<String, Value>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT key, value FROM entries WHERE value <> 'null' ORDER BY key")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(key, value)| -> Result<(String, Value)> {
                    Ok((key, serde_json::from_str(&value)?))
                })
                .collect()
        })
        .await
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(key: &str, value: Value, ts: u64, source: &str) -> Update {
        Update::new(json!([key, value]), Timestamp(ts), SourceId::new(source).unwrap())
    }

    #[tokio::test]
    async fn test_set_get_overwrite() {
        let store = SqliteModelStore::open_memory().unwrap();
        assert!(store.get("a").await.unwrap().is_none());

        let first = update("a", json!({"n": 1}), 1, "A");
        store.set("a", &first).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(first));

        let second = update("a", json!("two"), 2, "B").with_signature("beef".into());
        store.set("a", &second).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_keys_and_json_skip_null() {
        let store = SqliteModelStore::open_memory().unwrap();
        store.set("a", &update("a", json!(1), 1, "A")).await.unwrap();
        store.set("b", &update("b", Value::Null, 2, "A")).await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["a".to_string()]);
        assert_eq!(Value::Object(store.to_json().await.unwrap()), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_history_matches_memory_backend() {
        let store = SqliteModelStore::open_memory().unwrap();
        store.set("x", &update("x", json!(1), 5, "B")).await.unwrap();
        store.set("y", &update("y", json!(2), 5, "A")).await.unwrap();
        store.set("z", &update("z", json!(3), 1, "C")).await.unwrap();

        let history = store.history(&Sources::new(), None).await.unwrap();
        let order: Vec<_> = history.iter().map(|u| u.source.to_string()).collect();
        assert_eq!(order, vec!["C", "A", "B"]);

        let policy = AcceptPolicy::blacklist(["x"]);
        let filtered = store.history(&Sources::new(), Some(&policy)).await.unwrap();
        assert_eq!(filtered.len(), 2);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.db");
        {
            let store = SqliteModelStore::open(&path).unwrap();
            store.set("k", &update("k", json!("v"), 7, "A")).await.unwrap();
        }
        let store = SqliteModelStore::open(&path).unwrap();
        let stored = store.get("k").await.unwrap().unwrap();
        assert_eq!(stored.timestamp, Timestamp(7));
        assert_eq!(stored.payload, json!(["k", "v"]));
    }
}
