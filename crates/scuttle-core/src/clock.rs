//! Vector clocks and the local timestamp source.
//!
//! A [`Sources`] map records, for every origin node, the highest timestamp
//! seen from it. Entries only ever move forward.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::{SourceId, Timestamp};
use crate::update::Update;

/// Vector clock: highest timestamp seen per source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sources(BTreeMap<SourceId, Timestamp>);

impl Sources {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Highest timestamp recorded for `source`, if any.
    pub fn get(&self, source: &SourceId) -> Option<Timestamp> {
        self.0.get(source).copied()
    }

    /// Raise the entry for `source` to `ts`.
    ///
    /// Returns false and leaves the clock untouched when `ts` is not newer
    /// than the recorded value.
    pub fn advance(&mut self, source: &SourceId, ts: Timestamp) -> bool {
        match self.0.get_mut(source) {
            Some(current) if *current >= ts => false,
            Some(current) => {
                *current = ts;
                true
            }
            None => {
                self.0.insert(source.clone(), ts);
                true
            }
        }
    }

    /// Whether `update` is newer than anything recorded for its source.
    pub fn is_novel(&self, update: &Update) -> bool {
        match self.0.get(&update.source) {
            Some(seen) => *seen < update.timestamp,
            None => true,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceId, &Timestamp)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(SourceId, Timestamp)> for Sources {
    fn from_iter<I: IntoIterator<Item = (SourceId, Timestamp)>>(iter: I) -> Self {
        let mut sources = Sources::new();
        for (source, ts) in iter {
            sources.advance(&source, ts);
        }
        sources
    }
}

/// Monotonic timestamp source.
///
/// Follows the wall clock but never hands out the same value twice, even when
/// called many times within one microsecond or when the wall clock steps back.
#[derive(Debug, Default)]
pub struct TimestampGenerator {
    last: AtomicU64,
}

impl TimestampGenerator {
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Next timestamp: `max(now, last + 1)`.
    pub fn next(&self) -> Timestamp {
        let now = now_micros();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Timestamp(candidate),
                Err(actual) => last = actual,
            }
        }
    }
}

/// Process-wide generator used for locally created updates.
pub fn timestamp() -> Timestamp {
    static GLOBAL: TimestampGenerator = TimestampGenerator::new();
    GLOBAL.next()
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
