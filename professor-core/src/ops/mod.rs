//! Per-operation-kind behavior
//!
//! Each operation kind that professor understands has an [`OperationHandler`]
//! providing three things:
//!
//! 1. **extract**: derive shape fingerprints from a raw record at ingest time
//! 2. **same_group**: decide whether two adjacent sorted records share a shape
//! 3. **summarize**: reduce one group to a [`Summary`]
//!
//! Handlers are collected into an [`OpRegistry`] once at startup and passed
//! to ingestion and aggregation explicitly. Kinds without a handler are still
//! ingested, but only with namespace normalization.
//!
//! | Kind | Handler |
//! |------|---------|
//! | `query` | [`QueryHandler`] |
//! | others | none (pass-through) |

mod query;

pub use query::QueryHandler;

use crate::analytics::{summarize_timings, Group};
use crate::error::Result;
use crate::types::{OpKind, RawRecord, StoredRecord, Summary};

/// Shape fingerprints extracted from one raw record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Skeleton of the effective query
    pub skeleton: Option<String>,
    /// Skeleton of the effective sort specification
    pub sort_skeleton: Option<String>,
}

/// Trait implemented by every operation-kind handler.
pub trait OperationHandler: Send + Sync {
    /// Which kind this handler is for
    fn kind(&self) -> OpKind;

    /// Fingerprint a raw record.
    ///
    /// Runs before key escaping, so it sees the record's original keys.
    fn extract(&self, raw: &RawRecord) -> Result<Extraction>;

    /// Whether `current` belongs to the same group as the record before it.
    fn same_group(&self, previous: &StoredRecord, current: &StoredRecord) -> bool;

    /// Reduce a group to its summary.
    ///
    /// Default implementation computes latency statistics over `millis`.
    fn summarize(&self, group: Group) -> Summary {
        summarize_timings(group)
    }
}

/// Immutable lookup table from operation kind to handler.
pub struct OpRegistry {
    handlers: Vec<Box<dyn OperationHandler>>,
}

impl OpRegistry {
    /// Build a registry from a set of handlers.
    ///
    /// If two handlers claim the same kind, the later one wins.
    pub fn new(handlers: Vec<Box<dyn OperationHandler>>) -> Self {
        let mut unique: Vec<Box<dyn OperationHandler>> = Vec::with_capacity(handlers.len());
        for handler in handlers {
            if let Some(pos) = unique.iter().position(|h| h.kind() == handler.kind()) {
                tracing::warn!(kind = %handler.kind(), "Replacing duplicate operation handler");
                unique.remove(pos);
            }
            tracing::debug!(kind = %handler.kind(), "Registered operation handler");
            unique.push(handler);
        }
        Self { handlers: unique }
    }

    /// A registry with no handlers: every kind passes through.
    pub fn empty() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Handler for a kind, if one is registered.
    pub fn handler_for(&self, kind: OpKind) -> Option<&dyn OperationHandler> {
        self.handlers
            .iter()
            .find(|h| h.kind() == kind)
            .map(|h| h.as_ref())
    }

    pub fn is_registered(&self, kind: OpKind) -> bool {
        self.handler_for(kind).is_some()
    }

    /// Kinds with a registered handler, in registration order.
    pub fn kinds(&self) -> Vec<OpKind> {
        self.handlers.iter().map(|h| h.kind()).collect()
    }
}

/// Create a registry with all built-in handlers.
pub fn create_default_registry() -> OpRegistry {
    OpRegistry::new(vec![Box::new(QueryHandler::new())])
}
