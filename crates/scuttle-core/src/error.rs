//! Error types for scuttle core.

use thiserror::Error;

/// Errors raised while building or validating updates and frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The source id is empty or collides with a reserved name.
    #[error("invalid source id: {0:?}")]
    InvalidSource(String),

    /// An update tuple on the wire did not have the expected shape.
    #[error("malformed update: {0}")]
    MalformedUpdate(String),

    /// A timestamp beyond [`crate::Timestamp::MAX`].
    #[error("timestamp {0} out of range")]
    TimestampOutOfRange(u64),

    /// A frame could not be classified as digest, control token or update.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
