//! # scuttle store
//!
//! Merge strategies and persistence for replicated state.
//!
//! A node is generic over a [`ReplicatedStore`]. Two strategies ship here:
//!
//! - [`LwwMap`] - last-writer-wins key/value map over a [`ModelBackend`]
//! - [`EventLog`] - append-only log of named events
//!
//! Map backends:
//!
//! - [`MemoryModelStore`] - in-memory, for tests and ephemeral replicas
//! - [`SqliteModelStore`] - SQLite persistence with schema migrations
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scuttle_store::{LwwMap, SqliteModelStore};
//!
//! let map = LwwMap::new(SqliteModelStore::open("model.db").unwrap());
//! ```

pub mod error;
pub mod event_log;
pub mod lww;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use event_log::EventLog;
pub use lww::LwwMap;
pub use memory::MemoryModelStore;
pub use sqlite::SqliteModelStore;
pub use traits::{ApplyOutcome, Change, ModelBackend, ReplicatedStore};
