//! Frames exchanged over a sync session.
//!
//! Three kinds of frame share one channel and are told apart by JSON shape:
//!
//! | Shape  | Frame                          |
//! |--------|--------------------------------|
//! | object | [`Digest`], the handshake      |
//! | string | the `"SYNC"` control token     |
//! | array  | an [`Update`] tuple            |

use serde::de::{self, Deserializer};
use serde::ser;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use scuttle_core::{AcceptPolicy, CoreError, SourceId, Sources, Update};

/// Control token marking the end of history replay.
pub const SYNC_TOKEN: &str = "SYNC";

/// Handshake announcing a node's identity, clock and accept policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SourceId>,
    /// Absent only in malformed digests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<Sources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<AcceptPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Digest {
    pub fn new(id: SourceId, clock: Sources) -> Self {
        Self {
            id: Some(id),
            clock: Some(clock),
            accept: None,
            meta: None,
        }
    }
}

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Digest(Digest),
    Sync,
    Update(Update),
}

impl Frame {
    pub fn to_value(&self) -> Result<Value, CoreError> {
        match self {
            Frame::Digest(digest) => serde_json::to_value(digest)
                .map_err(|e| CoreError::Encoding(format!("digest: {e}"))),
            Frame::Sync => Ok(Value::from(SYNC_TOKEN)),
            Frame::Update(update) => Ok(update.to_value()),
        }
    }

    /// Classify a decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(_) => serde_json::from_value(value)
                .map(Frame::Digest)
                .map_err(|e| CoreError::MalformedFrame(format!("bad digest: {e}"))),
            Value::String(s) if s == SYNC_TOKEN => Ok(Frame::Sync),
            Value::String(s) => Err(CoreError::MalformedFrame(format!(
                "unknown control token {s:?}"
            ))),
            Value::Array(_) => Update::from_value(value).map(Frame::Update),
            other => Err(CoreError::MalformedFrame(format!(
                "unexpected frame: {other}"
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Digest(_) => "digest",
            Frame::Sync => "sync",
            Frame::Update(_) => "update",
        }
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value()
            .map_err(<S::Error as ser::Error>::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Frame::from_value(value).map_err(de::Error::custom)
    }
}
