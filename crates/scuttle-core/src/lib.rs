//! # scuttle core
//!
//! Pure value types for gossip replication: updates, vector clocks, accept
//! policies and signing hooks.
//!
//! This crate performs no I/O and spawns no tasks.
//!
//! ## Key Types
//!
//! - [`Update`] - The immutable unit of replication
//! - [`Sources`] - Vector clock, highest timestamp seen per source
//! - [`AcceptPolicy`] - Whitelist/blacklist filter over update keys
//! - [`Signer`] / [`Verifier`] - Hooks for authenticating updates

pub mod accept;
pub mod canonical;
pub mod clock;
pub mod crypto;
pub mod error;
pub mod types;
pub mod update;
pub mod validation;

pub use accept::AcceptPolicy;
pub use canonical::{canonical_json, signed_message};
pub use clock::{timestamp, Sources, TimestampGenerator};
pub use crypto::{Ed25519PublicKey, Keypair, Keyring, Signer, Verifier};
pub use error::{CoreError, Result};
pub use types::{SourceId, Timestamp, RESERVED_NAME};
pub use update::{sort_updates, Update};
pub use validation::validate_update;
