//! # scuttle sync
//!
//! Gossip replication between nodes: the admission engine, the per-link
//! sync protocol and the duplex transport it runs over.
//!
//! ## Overview
//!
//! A [`Node`] owns a vector clock and a [`scuttle_store::ReplicatedStore`].
//! Every link to a peer is a [`SyncSession`]: the two sides exchange digests,
//! replay whatever history the other lacks, mark the end of replay with a
//! SYNC token and then forward live updates. Sessions talk through a
//! [`Duplex`], and [`link`] pumps frames between two duplexes. Over a byte
//! stream, [`connect_io`] runs each side through a [`FrameCodec`].
//!
//! ## Key Properties
//!
//! - **Idempotent**: re-delivering an update is detected as stale
//! - **Convergent**: nodes that have seen the same updates hold the same state
//! - **Loop-free**: an update is never echoed to the peer that relayed it
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scuttle_store::LwwMap;
//! use scuttle_sync::{link, Node, SessionConfig};
//!
//! # async fn example() -> scuttle_sync::Result<()> {
//! let a: Node<LwwMap> = Node::with_store(LwwMap::default());
//! let b: Node<LwwMap> = Node::with_store(LwwMap::default());
//!
//! let sa = a.create_stream(SessionConfig::duplex());
//! let sb = b.create_stream(SessionConfig::duplex());
//! let _link = link(&sa, &sb);
//! sa.wait_synced().await?;
//!
//! a.local_update(serde_json::json!(["color", "red"])).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod convergence;
pub mod error;
pub mod messages;
pub mod node;
pub mod protocol;
pub mod transport;
pub mod wire;

pub use codec::{CborCodec, FrameCodec, JsonLinesCodec, MAX_FRAME_LEN};
pub use convergence::{state_hash, verify_convergence, ConvergenceResult};
pub use error::{Result, SyncError};
pub use messages::{Digest, Frame, SYNC_TOKEN};
pub use node::{
    Admission, ListenerId, Node, NodeConfig, NodeEvent, NodeListener, Rejection,
    DEFAULT_EVENT_CAPACITY,
};
pub use protocol::{SessionConfig, SessionEvent, SessionPhase, SessionStats, SyncSession};
pub use transport::{
    link, DirectionState, Duplex, DuplexCore, DuplexOptions, FrameHandler, Link, Pull,
    Termination,
};
pub use wire::connect_io;
