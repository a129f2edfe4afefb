//! # scuttle testkit
//!
//! Testing utilities for scuttle.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: linked node pairs, signed nodes, tracing setup, timeouts
//! - **Generators**: Proptest strategies for updates, keys and write sequences
//! - **Golden vectors**: Known wire frames and signed updates for
//!   cross-implementation checks
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use scuttle_testkit::fixtures::{connect, map_node};
//!
//! # async fn example() {
//! let a = map_node("A");
//! let b = map_node("B");
//! let conn = connect(&a, &b);
//! conn.synced().await;
//! # }
//! ```
//!
//! ## Golden Vectors
//!
//! ```rust
//! use scuttle_testkit::vectors::verify_all_vectors;
//!
//! assert!(verify_all_vectors().is_empty());
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    connect, connect_one_way, connect_with, eventually, init_tracing, map_node, within,
    Connection,
};
pub use generators::{model_update, write_ops, WriteOp};
pub use vectors::{all_vectors, verify_all_vectors, WireVector};
