//! Structural validation of updates received from peers.

use crate::error::{CoreError, Result};
use crate::types::Timestamp;
use crate::update::Update;

/// Check that an update may enter admission.
///
/// Shape checks on the wire tuple happen in [`Update::from_value`]; this
/// covers the invariants a constructed value must still hold.
pub fn validate_update(update: &Update) -> Result<()> {
    if !update.source.is_valid() {
        return Err(CoreError::InvalidSource(update.source.to_string()));
    }
    if update.timestamp > Timestamp::MAX {
        return Err(CoreError::TimestampOutOfRange(update.timestamp.as_micros()));
    }
    if let Some(by) = &update.forwarded_by {
        if !by.is_valid() {
            return Err(CoreError::InvalidSource(by.to_string()));
        }
    }
    Ok(())
}
