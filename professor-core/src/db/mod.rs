//! Database layer for professor
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - The source registry and its sync watermarks
//! - Persistence of normalized profiler records
//! - Sorted, paged read-back for aggregation
//!
//! Ingestion and aggregation only see the [`PersistenceSink`] and
//! [`SortedReader`] traits; [`Database`] implements both.

pub mod repo;
pub mod schema;

pub use repo::{Database, SortedRecords};

use crate::error::Result;
use crate::types::{OpKind, SourceDescriptor, StoredRecord};

/// Lazy stream of stored records
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<StoredRecord>> + 'a>;

/// Durable storage for ingestion output.
///
/// A sync pass brackets its writes with [`begin`](Self::begin) and either
/// [`commit`](Self::commit) or [`rollback`](Self::rollback). The defaults do
/// nothing, so a sink without transactions keeps whatever was written before
/// an aborted pass.
pub trait PersistenceSink {
    /// Store one normalized record
    fn save_record(&self, record: &StoredRecord) -> Result<()>;

    /// Store an updated source, including its watermark
    fn save_source(&self, source: &SourceDescriptor) -> Result<()>;

    /// Start a batch of writes that become visible together
    fn begin(&self) -> Result<()> {
        Ok(())
    }

    /// Make the current batch durable
    fn commit(&self) -> Result<()> {
        Ok(())
    }

    /// Discard every write since [`begin`](Self::begin)
    fn rollback(&self) -> Result<()> {
        Ok(())
    }
}

/// Read-back of stored records in grouping order.
pub trait SortedReader {
    /// Records of one source and operation kind, ordered by
    /// `(collection, op, skeleton)` ascending with ordinal string comparison.
    /// Records without a skeleton sort first within their collection.
    fn sorted_records<'a>(
        &'a self,
        source_id: &str,
        op: OpKind,
        collection: Option<&str>,
    ) -> Result<RecordStream<'a>>;
}
