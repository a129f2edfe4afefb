//! Error types for scuttle.

use scuttle_core::CoreError;
use scuttle_store::StoreError;
use scuttle_sync::SyncError;
use thiserror::Error;

/// Errors that can occur in scuttle operations.
#[derive(Debug, Error)]
pub enum ScuttleError {
    /// Malformed value.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// The event channel closed.
    #[error("event channel closed")]
    ChannelClosed,
}

/// Result type for scuttle operations.
pub type Result<T> = std::result::Result<T, ScuttleError>;
