//! # scuttle
//!
//! Scuttlebutt-style gossip replication: nodes exchange vector clocks, send
//! each other exactly the updates the other lacks, then keep forwarding new
//! updates as they happen. Any topology of links converges.
//!
//! ## Overview
//!
//! - [`Model`]: a replicated key/value map, last writer wins per key
//! - [`ReliableEvent`]: a replicated event emitter that keeps every event
//!
//! Both wrap a [`sync::Node`]. Connect two of them by linking a stream from
//! each:
//!
//! ```rust,no_run
//! use scuttle::{link, Model, SessionConfig};
//!
//! # async fn example() -> scuttle::Result<()> {
//! let a = Model::with_id("A")?;
//! let b = Model::with_id("B")?;
//!
//! let sa = a.create_stream(SessionConfig::duplex());
//! let sb = b.create_stream(SessionConfig::duplex());
//! let _link = link(&sa, &sb);
//!
//! a.set("color", "red").await?;
//! sb.wait_synced().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Re-exports
//!
//! - `scuttle::core` - Updates, clocks, accept policies, signing
//! - `scuttle::store` - Merge strategies and backends
//! - `scuttle::sync` - Node core, sessions, transport, codecs

pub mod error;
pub mod model;
pub mod reliable_event;

pub use scuttle_core as core;
pub use scuttle_store as store;
pub use scuttle_sync as sync;

pub use error::{Result, ScuttleError};
pub use model::{KeyReceiver, Model};
pub use reliable_event::{EventReceiver, FiredEvent, ReliableEvent};

pub use scuttle_core::{AcceptPolicy, Keypair, Keyring, SourceId, Sources, Timestamp, Update};
pub use scuttle_sync::{
    link, Admission, Link, NodeConfig, NodeEvent, Rejection, SessionConfig, SessionEvent,
    SessionPhase, SyncSession, Termination,
};
