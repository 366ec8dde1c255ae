//! Handler for `query` operations.

use super::{Extraction, OperationHandler};
use crate::document::Document;
use crate::error::Result;
use crate::skeleton::skeleton;
use crate::types::{OpKind, RawRecord, StoredRecord};

/// Modifier key wrapping the actual query
pub const QUERY_MODIFIER: &str = "$query";

/// Modifier key carrying the sort specification
pub const ORDERBY_MODIFIER: &str = "$orderby";

/// Groups queries by their skeleton.
///
/// A profiled query either is the filter itself:
///
/// ```text
/// {"processing.status": "new"}
/// ```
///
/// or wraps it together with modifiers:
///
/// ```text
/// {"$query": {"processing.status": "new"}, "$orderby": {"date": 1}}
/// ```
///
/// Both produce the skeleton `{processing.status}`; the second also produces
/// the sort skeleton `{date}`.
pub struct QueryHandler;

impl QueryHandler {
    pub fn new() -> Self {
        Self
    }

    /// The filter part of a possibly-wrapped query.
    fn effective_query(query: &Document) -> &Document {
        query.get_document(QUERY_MODIFIER).unwrap_or(query)
    }

    /// The sort part: `$orderby` inside the query, else the separately
    /// reported sort, else nothing.
    fn effective_sort<'a>(raw: &'a RawRecord, empty: &'a Document) -> &'a Document {
        raw.query
            .get_document(ORDERBY_MODIFIER)
            .or(raw.sort.as_ref())
            .unwrap_or(empty)
    }
}

impl Default for QueryHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationHandler for QueryHandler {
    fn kind(&self) -> OpKind {
        OpKind::Query
    }

    fn extract(&self, raw: &RawRecord) -> Result<Extraction> {
        let empty = Document::new();
        let query = Self::effective_query(&raw.query);
        let sort = Self::effective_sort(raw, &empty);

        Ok(Extraction {
            skeleton: Some(skeleton(query)?),
            sort_skeleton: Some(skeleton(sort)?),
        })
    }

    fn same_group(&self, previous: &StoredRecord, current: &StoredRecord) -> bool {
        match (&previous.skeleton, &current.skeleton) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Value;
    use chrono::Utc;
    use serde_json::json;

    fn raw(query: serde_json::Value) -> RawRecord {
        RawRecord::new("www.formcapture", OpKind::Query, 40, Utc::now())
            .with_query(Document::from(query))
    }

    fn stored(skeleton: Option<&str>) -> StoredRecord {
        StoredRecord {
            id: None,
            source_id: "src".to_string(),
            ns: "www.c".to_string(),
            collection: "c".to_string(),
            op: OpKind::Query,
            skeleton: skeleton.map(str::to_string),
            sort_skeleton: None,
            millis: 1,
            ts: Utc::now(),
            client: None,
            user: None,
            query: Document::new(),
            sort: None,
            extra: Document::new(),
        }
    }

    #[test]
    fn test_extract_wrapped_query() {
        let record = raw(json!({
            "$orderby": {"date": 1},
            "$query": {"processing.status": "new"}
        }));
        let extraction = QueryHandler::new().extract(&record).unwrap();
        assert_eq!(extraction.skeleton.as_deref(), Some("{processing.status}"));
        assert_eq!(extraction.sort_skeleton.as_deref(), Some("{date}"));
    }

    #[test]
    fn test_extract_plain_query() {
        let record = raw(json!({"_id": 1, "locked": false}));
        let extraction = QueryHandler::new().extract(&record).unwrap();
        assert_eq!(extraction.skeleton.as_deref(), Some("{_id,locked}"));
        assert_eq!(extraction.sort_skeleton.as_deref(), Some("{}"));
    }

    #[test]
    fn test_separate_sort_used_without_orderby() {
        let mut record = raw(json!({"a": 1}));
        record.sort = Some(Document::from(json!({"b": -1, "a": 1})));
        let extraction = QueryHandler::new().extract(&record).unwrap();
        assert_eq!(extraction.sort_skeleton.as_deref(), Some("{a,b}"));
    }

    #[test]
    fn test_non_document_query_modifier_is_ignored() {
        let record = raw(json!({"$query": 5}));
        let extraction = QueryHandler::new().extract(&record).unwrap();
        assert_eq!(extraction.skeleton.as_deref(), Some("{$query}"));
    }

    #[test]
    fn test_extract_propagates_unsupported_type() {
        let mut record = raw(json!({}));
        record.query.insert("a", Value::Foreign("DBPointer".to_string()));
        assert!(QueryHandler::new().extract(&record).is_err());
    }

    #[test]
    fn test_same_group() {
        let handler = QueryHandler::new();
        assert!(handler.same_group(&stored(Some("{a}")), &stored(Some("{a}"))));
        assert!(!handler.same_group(&stored(Some("{a}")), &stored(Some("{b}"))));
        assert!(!handler.same_group(&stored(None), &stored(None)));
        assert!(!handler.same_group(&stored(Some("{a}")), &stored(None)));
    }
}
