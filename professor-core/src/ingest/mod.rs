//! Ingestion of profiler output
//!
//! Raw records captured by a monitored database's profiler are normalized
//! into [`StoredRecord`]s and handed to a [`PersistenceSink`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │  ProfileSource  │ ──► │   SyncTracker    │ ──► │ PersistenceSink │
//! │ (RecordCursor)  │     │                  │     │   (Database)    │
//! └─────────────────┘     └──────────────────┘     └─────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │   RecordIngestor     │
//!                    │  ├─ namespace split  │
//!                    │  ├─ OperationHandler │
//!                    │  └─ sanitize         │
//!                    └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use professor_core::ingest::SyncTracker;
//! use professor_core::ops::create_default_registry;
//!
//! let tracker = SyncTracker::new(create_default_registry());
//! let report = tracker.sync_once(&mut source, &profiles, &db)?;
//! println!("Ingested {} records", report.accepted);
//! ```
//!
//! [`PersistenceSink`]: crate::db::PersistenceSink

mod source;
mod sync;

pub use source::{InMemoryProfiles, ProfileSource, RecordCursor, SyncWindow};
pub use sync::{SyncReport, SyncTracker};

use crate::error::Result;
use crate::ops::OpRegistry;
use crate::sanitize::sanitize;
use crate::types::{RawRecord, SourceDescriptor, StoredRecord};

/// Collection-name prefixes of administrative and temporary namespaces.
///
/// Records in these collections are never stored.
pub const INTERNAL_NAMESPACE_PREFIXES: &[&str] = &["system.", "tmp.mr."];

/// Outcome of ingesting one raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The record was normalized and should be persisted
    Accepted(StoredRecord),
    /// The record was deliberately filtered out
    Skipped(SkipReason),
}

/// Reason a record was filtered out during ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The collection is administrative or temporary
    InternalNamespace { collection: String },
}

/// Strip the `"{dbname}."` prefix from a namespace.
///
/// A namespace belonging to a different database is returned whole.
pub fn collection_name(dbname: &str, ns: &str) -> String {
    match ns.strip_prefix(dbname).and_then(|rest| rest.strip_prefix('.')) {
        Some(collection) => collection.to_string(),
        None => {
            tracing::warn!(ns, dbname, "Namespace outside the source database");
            ns.to_string()
        }
    }
}

/// Whether a collection is administrative or temporary
pub fn is_internal_collection(collection: &str) -> bool {
    INTERNAL_NAMESPACE_PREFIXES
        .iter()
        .any(|prefix| collection.starts_with(prefix))
}

/// Normalizes raw records into storable records.
///
/// Only reads the handler table; holds no other state.
pub struct RecordIngestor<'a> {
    registry: &'a OpRegistry,
}

impl<'a> RecordIngestor<'a> {
    pub fn new(registry: &'a OpRegistry) -> Self {
        Self { registry }
    }

    /// Normalize one raw record for `source`.
    ///
    /// Resolves the collection, drops internal namespaces, fingerprints the
    /// record with its kind's handler (if any) and escapes every document key.
    /// Fails with [`Error::UnsupportedType`](crate::Error::UnsupportedType)
    /// if any document holds a value outside the recognized types.
    pub fn ingest(&self, source: &SourceDescriptor, raw: RawRecord) -> Result<IngestOutcome> {
        let collection = collection_name(&source.dbname, &raw.ns);
        if is_internal_collection(&collection) {
            return Ok(IngestOutcome::Skipped(SkipReason::InternalNamespace {
                collection,
            }));
        }

        let extraction = self
            .registry
            .handler_for(raw.op)
            .map(|handler| handler.extract(&raw))
            .transpose()?
            .unwrap_or_default();

        let query = sanitize(&raw.query)?;
        let sort = raw.sort.as_ref().map(sanitize).transpose()?;
        let extra = sanitize(&raw.extra)?;

        Ok(IngestOutcome::Accepted(StoredRecord {
            id: None,
            source_id: source.id.clone(),
            ns: raw.ns,
            collection,
            op: raw.op,
            skeleton: extraction.skeleton,
            sort_skeleton: extraction.sort_skeleton,
            millis: raw.millis,
            ts: raw.ts,
            client: raw.client,
            user: raw.user,
            query,
            sort,
            extra,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Value};
    use crate::error::Error;
    use crate::ops::create_default_registry;
    use crate::types::OpKind;
    use chrono::Utc;
    use serde_json::json;

    fn source() -> SourceDescriptor {
        SourceDescriptor::new("localhost", "www")
    }

    fn raw(ns: &str, op: OpKind, query: serde_json::Value) -> RawRecord {
        RawRecord::new(ns, op, 12, Utc::now()).with_query(Document::from(query))
    }

    fn accepted(outcome: IngestOutcome) -> StoredRecord {
        match outcome {
            IngestOutcome::Accepted(record) => record,
            other => panic!("expected accepted record, got {:?}", other),
        }
    }

    #[test]
    fn test_collection_name() {
        assert_eq!(collection_name("www", "www.users"), "users");
        assert_eq!(collection_name("www", "www.system.indexes"), "system.indexes");
        assert_eq!(collection_name("www", "other.users"), "other.users");
        assert_eq!(collection_name("www", "wwwx.users"), "wwwx.users");
    }

    #[test]
    fn test_internal_namespaces_skipped() {
        let registry = create_default_registry();
        let ingestor = RecordIngestor::new(&registry);

        for ns in ["www.system.profile", "www.tmp.mr.job_1"] {
            let outcome = ingestor.ingest(&source(), raw(ns, OpKind::Query, json!({}))).unwrap();
            assert!(matches!(outcome, IngestOutcome::Skipped(SkipReason::InternalNamespace { .. })));
        }
    }

    #[test]
    fn test_internal_skip_happens_before_validation() {
        let registry = create_default_registry();
        let mut record = raw("www.system.js", OpKind::Query, json!({}));
        record.query.insert("f", Value::Foreign("Undefined".to_string()));

        let outcome = RecordIngestor::new(&registry).ingest(&source(), record).unwrap();
        assert!(matches!(outcome, IngestOutcome::Skipped(_)));
    }

    #[test]
    fn test_query_is_fingerprinted_and_sanitized() {
        let registry = create_default_registry();
        let source = source();
        let record = raw(
            "www.formcapture",
            OpKind::Query,
            json!({"$query": {"processing.status": "new"}, "$orderby": {"date": 1}}),
        );

        let stored = accepted(RecordIngestor::new(&registry).ingest(&source, record).unwrap());

        assert_eq!(stored.source_id, source.id);
        assert_eq!(stored.collection, "formcapture");
        assert_eq!(stored.ns, "www.formcapture");
        assert_eq!(stored.skeleton.as_deref(), Some("{processing.status}"));
        assert_eq!(stored.sort_skeleton.as_deref(), Some("{date}"));
        assert_eq!(
            stored.query,
            Document::from(json!({
                "_$_query": {"processing_,_status": "new"},
                "_$_orderby": {"date": 1}
            }))
        );
    }

    #[test]
    fn test_unhandled_kind_passes_through() {
        let registry = create_default_registry();
        let mut record = raw("www.users", OpKind::Insert, json!({"a.b": 1}));
        record.extra = Document::from(json!({"$comment": "x"}));

        let stored = accepted(RecordIngestor::new(&registry).ingest(&source(), record).unwrap());

        assert_eq!(stored.collection, "users");
        assert!(stored.skeleton.is_none());
        assert!(stored.sort_skeleton.is_none());
        assert_eq!(stored.query, Document::from(json!({"a_,_b": 1})));
        assert_eq!(stored.extra, Document::from(json!({"_$_comment": "x"})));
    }

    #[test]
    fn test_unsupported_type_rejected() {
        let registry = create_default_registry();
        let mut record = raw("www.users", OpKind::Insert, json!({}));
        record.extra.insert("bad", Value::Foreign("MinKey".to_string()));

        let result = RecordIngestor::new(&registry).ingest(&source(), record);
        assert!(matches!(result, Err(Error::UnsupportedType(name)) if name == "MinKey"));
    }
}
