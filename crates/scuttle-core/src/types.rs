//! Strong type definitions for scuttle.
//!
//! Identifiers and clock values are newtypes so a timestamp can never be
//! passed where a source id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Name that can never be used as a source id or a model key.
pub const RESERVED_NAME: &str = "__proto__";

/// Identity of the node that originated an update.
///
/// Either supplied by the application or generated with [`SourceId::random`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Wrap a string, rejecting empty and reserved ids.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id == RESERVED_NAME {
            return Err(CoreError::InvalidSource(id));
        }
        Ok(Self(id))
    }

    /// Generate a random id: 24 upper-case hex characters.
    pub fn random() -> Self {
        use rand::Rng;
        let bytes: [u8; 12] = rand::thread_rng().gen();
        Self(hex::encode_upper(bytes))
    }

    /// Derive an id from an ed25519 public key.
    pub fn from_public_key(key: &crate::crypto::Ed25519PublicKey) -> Self {
        Self(key.to_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id is usable as an update source.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0 != RESERVED_NAME
    }
}

impl fmt::Debug for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceId({})", self.0)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for SourceId {
    type Error = CoreError;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for SourceId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

/// Logical clock value of an update, in microseconds since the Unix epoch.
///
/// Values produced by one [`crate::TimestampGenerator`] are strictly
/// increasing, so they also serve as per-source sequence numbers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    /// Largest timestamp admitted from the wire. Bounded by what a signed
    /// 64-bit column can hold.
    pub const MAX: Self = Self(i64::MAX as u64);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(micros: u64) -> Self {
        Self(micros)
    }
}
