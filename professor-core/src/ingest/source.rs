//! Where raw profiler records come from

use crate::error::Result;
use crate::types::{OpKind, RawRecord, SourceDescriptor};
use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};

/// Lazy stream of raw records
pub type RecordCursor<'a> = Box<dyn Iterator<Item = Result<RawRecord>> + 'a>;

/// Time window of one sync pass: `[since, until)`.
///
/// `since` is `None` for a source that was never synced, meaning no lower
/// bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: DateTime<Utc>,
}

impl SyncWindow {
    pub fn new(since: Option<DateTime<Utc>>, until: DateTime<Utc>) -> Self {
        Self { since, until }
    }

    /// Whether `ts` lies inside the window
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| ts >= since) && ts < self.until
    }
}

/// Access to a monitored database's profiler output.
///
/// Implementations connect to the monitored database however they like; the
/// sync pass only needs a cursor.
pub trait ProfileSource {
    /// Every raw record of `source` captured inside `window` whose kind is in
    /// `kinds`, in any order.
    fn profiles<'a>(
        &'a self,
        source: &SourceDescriptor,
        window: &SyncWindow,
        kinds: &[OpKind],
    ) -> Result<RecordCursor<'a>>;
}

/// A [`ProfileSource`] over records held in memory.
///
/// Useful for tests and for replaying exported profiler data. Records can be
/// added while syncs run.
#[derive(Default)]
pub struct InMemoryProfiles {
    records: Mutex<Vec<RawRecord>>,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: RawRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<RawRecord> for InMemoryProfiles {
    fn from_iter<T: IntoIterator<Item = RawRecord>>(iter: T) -> Self {
        Self {
            records: Mutex::new(iter.into_iter().collect()),
        }
    }
}

impl ProfileSource for InMemoryProfiles {
    fn profiles<'a>(
        &'a self,
        _source: &SourceDescriptor,
        window: &SyncWindow,
        kinds: &[OpKind],
    ) -> Result<RecordCursor<'a>> {
        let matching: Vec<RawRecord> = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| window.contains(r.ts) && kinds.contains(&r.op))
            .cloned()
            .collect();
        Ok(Box::new(matching.into_iter().map(Ok)))
    }
}
