//! Append-only event log.
//!
//! Payloads are `[event, args...]`. Every admitted update is kept, grouped by
//! event name, so late joiners replay the full sequence.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard};

use async_trait::async_trait;
use scuttle_core::{sort_updates, AcceptPolicy, Sources, Update, RESERVED_NAME};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::traits::{key_of, ApplyOutcome, Change, ReplicatedStore};

/// Replicated log of named events.
#[derive(Debug, Default)]
pub struct EventLog {
    events: RwLock<BTreeMap<String, Vec<Update>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Vec<Update>>> {
        self.events.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Updates recorded for `event`, in arrival order.
    pub fn events(&self, event: &str) -> Vec<Update> {
        self.read().get(event).cloned().unwrap_or_default()
    }

    /// Names of all events seen so far.
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Total number of recorded updates.
    pub fn len(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Arguments following the event name.
fn args_of(update: &Update) -> Value {
    match update.payload.as_array() {
        Some(items) => Value::Array(items.iter().skip(1).cloned().collect()),
        None => Value::Array(Vec::new()),
    }
}

#[async_trait]
impl ReplicatedStore for EventLog {
    fn key_of(&self, update: &Update) -> Option<String> {
        key_of(update)
    }

    async fn apply_update(&self, update: &Update) -> Result<ApplyOutcome> {
        let Some(event) = key_of(update) else {
            return Ok(ApplyOutcome::Invalid(
                "payload must be an [event, args...] array".into(),
            ));
        };
        if event == RESERVED_NAME {
            return Ok(ApplyOutcome::Invalid(format!("reserved event {event:?}")));
        }

        let stored = Update {
            forwarded_by: None,
            ..update.clone()
        };
        let value = args_of(&stored);
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event.clone())
            .or_default()
            .push(stored);
        Ok(ApplyOutcome::Applied(Change { key: event, value }))
    }

    async fn history(&self, peer: &Sources, accept: Option<&AcceptPolicy>) -> Result<Vec<Update>> {
        let mut updates: Vec<Update> = self
            .read()
            .iter()
            .filter(|(event, _)| accept.map_or(true, |policy| policy.accepts(event)))
            .flat_map(|(_, updates)| updates.iter())
            .filter(|update| peer.is_novel(update))
            .cloned()
            .collect();
        sort_updates(&mut updates);
        Ok(updates)
    }

    async fn to_json(&self) -> Result<Value> {
        let map: Map<String, Value> = self
            .read()
            .iter()
            .map(|(event, updates)| {
                (
                    event.clone(),
                    Value::Array(updates.iter().map(args_of).collect()),
                )
            })
            .collect();
        Ok(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scuttle_core::{SourceId, Timestamp};
    use serde_json::json;

    fn event(payload: Value, ts: u64, source: &str) -> Update {
        Update::new(payload, Timestamp(ts), SourceId::new(source).unwrap())
    }

    #[tokio::test]
    async fn test_every_event_is_kept() {
        let log = EventLog::new();
        for (i, animal) in ["aardvark", "antelope", "anteater"].iter().enumerate() {
            let outcome = log
                .apply_update(&event(json!(["a", animal]), i as u64 + 1, "A"))
                .await
                .unwrap();
            assert_eq!(
                outcome,
                ApplyOutcome::Applied(Change {
                    key: "a".into(),
                    value: json!([animal])
                })
            );
        }
        assert_eq!(log.events("a").len(), 3);
        assert_eq!(
            log.to_json().await.unwrap(),
            json!({"a": [["aardvark"], ["antelope"], ["anteater"]]})
        );
    }

    #[tokio::test]
    async fn test_history_respects_clock_and_policy() {
        let log = EventLog::new();
        log.apply_update(&event(json!(["a", 1]), 1, "A")).await.unwrap();
        log.apply_update(&event(json!(["b", 2]), 2, "B")).await.unwrap();
        log.apply_update(&event(json!(["a", 3]), 3, "A")).await.unwrap();

        let mut peer = Sources::new();
        peer.advance(&SourceId::new("A").unwrap(), Timestamp(1));
        let history = log.history(&peer, None).await.unwrap();
        let stamps: Vec<_> = history.iter().map(|u| u.timestamp.0).collect();
        assert_eq!(stamps, vec![2, 3]);

        let policy = AcceptPolicy::whitelist(["b"]);
        let filtered = log.history(&Sources::new(), Some(&policy)).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].timestamp, Timestamp(2));
    }

    #[tokio::test]
    async fn test_invalid_event_payloads() {
        let log = EventLog::new();
        assert!(matches!(
            log.apply_update(&event(json!("bare"), 1, "A")).await.unwrap(),
            ApplyOutcome::Invalid(_)
        ));
        assert!(matches!(
            log.apply_update(&event(json!(["__proto__"]), 2, "A")).await.unwrap(),
            ApplyOutcome::Invalid(_)
        ));
        assert!(log.is_empty());
    }
}
