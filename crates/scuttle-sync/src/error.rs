//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during sync operations.
///
/// Per-update outcomes (stale, unverified, superseded) are not errors; see
/// [`crate::Admission`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] scuttle_store::StoreError),

    /// A value could not be built or parsed.
    #[error("core error: {0}")]
    Core(#[from] scuttle_core::CoreError),

    /// Frame encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The peer violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// This node's own clock entry is at [`scuttle_core::Timestamp::MAX`].
    #[error("no timestamp left for a local update")]
    ClockExhausted,

    /// The session closed before the awaited condition was reached.
    #[error("session closed")]
    Closed,

    /// A transport task panicked or was cancelled.
    #[error("transport task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Task(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
