//! Update: the unit of replication.
//!
//! An update is immutable once created. Relaying it to another peer produces
//! a tagged copy via [`Update::forwarded`] rather than mutating the original.
//!
//! On the wire an update is the ordered tuple
//! `[payload, timestamp, source, forwarded_by?, signature?]`.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{CoreError, Result};
use crate::types::{SourceId, Timestamp};

/// Tuple positions of the wire encoding.
pub mod index {
    pub const PAYLOAD: usize = 0;
    pub const TIMESTAMP: usize = 1;
    pub const SOURCE: usize = 2;
    pub const FORWARDED_BY: usize = 3;
    pub const SIGNATURE: usize = 4;
}

/// A replicated update.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Opaque application data, e.g. `[key, value]` or `[event, args...]`.
    pub payload: Value,
    /// Logical clock value assigned by the originating node.
    pub timestamp: Timestamp,
    /// The node that created this update.
    pub source: SourceId,
    /// The node that relayed this copy over the current link.
    pub forwarded_by: Option<SourceId>,
    /// Signature attached by the originating node, if it signs.
    pub signature: Option<String>,
}

impl Update {
    pub fn new(payload: Value, timestamp: Timestamp, source: SourceId) -> Self {
        Self {
            payload,
            timestamp,
            source,
            forwarded_by: None,
            signature: None,
        }
    }

    /// Copy of this update tagged as relayed by `by`.
    pub fn forwarded(&self, by: &SourceId) -> Self {
        Self {
            forwarded_by: Some(by.clone()),
            ..self.clone()
        }
    }

    /// Copy of this update carrying `signature`.
    pub fn with_signature(mut self, signature: String) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Total order used for history replay: timestamp, then source id.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.source.cmp(&other.source))
    }

    /// Element `i` of an array payload.
    pub fn payload_item(&self, i: usize) -> Option<&Value> {
        self.payload.as_array().and_then(|items| items.get(i))
    }

    /// Encode as the wire tuple.
    pub fn to_value(&self) -> Value {
        let mut items = vec![
            self.payload.clone(),
            Value::from(self.timestamp.as_micros()),
            Value::from(self.source.as_str()),
        ];
        if self.forwarded_by.is_some() || self.signature.is_some() {
            items.push(
                self.forwarded_by
                    .as_ref()
                    .map(|f| Value::from(f.as_str()))
                    .unwrap_or(Value::Null),
            );
        }
        if let Some(sig) = &self.signature {
            items.push(Value::from(sig.as_str()));
        }
        Value::Array(items)
    }

    /// Decode a wire tuple, checking its shape.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Array(mut items) = value else {
            return Err(CoreError::MalformedUpdate("expected an array".into()));
        };
        if items.len() < 3 || items.len() > 5 {
            return Err(CoreError::MalformedUpdate(format!(
                "expected 3 to 5 elements, got {}",
                items.len()
            )));
        }
        let signature = optional_string(items.get(index::SIGNATURE), "signature")?;
        let forwarded_by = optional_string(items.get(index::FORWARDED_BY), "forwarded_by")?
            .map(SourceId::new)
            .transpose()?;
        let source = match &items[index::SOURCE] {
            Value::String(s) => SourceId::new(s.as_str())?,
            _ => return Err(CoreError::MalformedUpdate("source must be a string".into())),
        };
        let timestamp = items[index::TIMESTAMP]
            .as_u64()
            .map(Timestamp)
            .ok_or_else(|| CoreError::MalformedUpdate("timestamp must be a number".into()))?;
        items.truncate(1);
        let payload = items.pop().unwrap_or(Value::Null);

        Ok(Self {
            payload,
            timestamp,
            source,
            forwarded_by,
            signature,
        })
    }
}

fn optional_string(value: Option<&Value>, field: &str) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(CoreError::MalformedUpdate(format!(
            "{field} must be a string"
        ))),
    }
}

impl Serialize for Update {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Update {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Update::from_value(value).map_err(de::Error::custom)
    }
}

/// Sort updates into canonical replay order.
pub fn sort_updates(updates: &mut [Update]) {
    updates.sort_by(Update::canonical_cmp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn src(s: &str) -> SourceId {
        SourceId::new(s).unwrap()
    }

    #[test]
    fn test_wire_tuple_shape() {
        let update = Update::new(json!(["foo", "bar"]), Timestamp(42), src("A"));
        assert_eq!(update.to_value(), json!([["foo", "bar"], 42, "A"]));

        let forwarded = update.forwarded(&src("B"));
        assert_eq!(forwarded.to_value(), json!([["foo", "bar"], 42, "A", "B"]));

        let signed = update.clone().with_signature("abcd".into());
        assert_eq!(signed.to_value(), json!([["foo", "bar"], 42, "A", null, "abcd"]));
    }

    #[test]
    fn test_forwarded_copies() {
        let update = Update::new(json!(1), Timestamp(1), src("A"));
        let copy = update.forwarded(&src("B"));
        assert_eq!(update.forwarded_by, None);
        assert_eq!(copy.forwarded_by, Some(src("B")));
    }

    #[test]
    fn test_from_value_rejects_bad_shapes() {
        assert!(Update::from_value(json!({"a": 1})).is_err());
        assert!(Update::from_value(json!([1, 2])).is_err());
        assert!(Update::from_value(json!([1, "x", "A"])).is_err());
        assert!(Update::from_value(json!([1, 2, 3])).is_err());
        assert!(Update::from_value(json!([1, 2, "__proto__"])).is_err());
        assert!(Update::from_value(json!([1, 2, "A", 7])).is_err());
        assert!(Update::from_value(json!([1, 2, "A", null, "sig", 6])).is_err());
    }

    #[test]
    fn test_deserialize_from_json() {
        let update: Update = serde_json::from_str(r#"[["k","v"],7,"A","B"]"#).unwrap();
        assert_eq!(update.timestamp, Timestamp(7));
        assert_eq!(update.source, src("A"));
        assert_eq!(update.forwarded_by, Some(src("B")));
        assert_eq!(update.payload, json!(["k", "v"]));
    }

    #[test]
    fn test_canonical_order_breaks_ties_by_source() {
        let mut updates = vec![
            Update::new(json!(1), Timestamp(5), src("B")),
            Update::new(json!(2), Timestamp(3), src("C")),
            Update::new(json!(3), Timestamp(5), src("A")),
        ];
        sort_updates(&mut updates);
        let order: Vec<_> = updates
            .iter()
            .map(|u| (u.timestamp.0, u.source.as_str().to_string()))
            .collect();
        assert_eq!(
            order,
            vec![(3, "C".into()), (5, "A".into()), (5, "B".into())]
        );
    }
}
