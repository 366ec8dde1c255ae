//! Aggregation of stored records into per-shape summaries
//!
//! The pipeline is lazy end to end:
//!
//! ```text
//! SortedReader ──▶ group_records ──▶ OperationHandler::summarize ──▶ Summary
//! ```
//!
//! Records are pulled from storage only as summaries are consumed, so a
//! caller can render the first summaries before the scan completes, or stop
//! early without reading the rest.

mod group;
mod summary;

pub use group::{group_records, Group, Groups};
pub use summary::{bucket_bounds, log_histogram, summarize_timings};

use crate::db::SortedReader;
use crate::error::{Error, Result};
use crate::ops::OpRegistry;
use crate::types::{OpKind, Summary};

/// Summarize every query shape of one source and operation kind.
///
/// Reads records sorted by `(collection, op, skeleton)`, groups runs with the
/// kind's `same_group` and reduces each run with its `summarize`. A group
/// never spans two collections, whatever `same_group` says. Restrict to one
/// collection by passing `Some(name)`.
///
/// Fails with [`Error::NoHandler`] if no handler is registered for `op`.
pub fn aggregate<'a>(
    reader: &'a dyn SortedReader,
    registry: &'a OpRegistry,
    source_id: &str,
    op: OpKind,
    collection: Option<&str>,
) -> Result<impl Iterator<Item = Result<Summary>> + 'a> {
    let handler = registry.handler_for(op).ok_or(Error::NoHandler(op))?;
    let records = reader.sorted_records(source_id, op, collection)?;

    tracing::debug!(source_id, op = %op, collection, "Aggregating records");

    Ok(group_records(records, move |previous, current| {
        previous.collection == current.collection && handler.same_group(previous, current)
    })
    .map(move |group| group.map(|group| handler.summarize(group))))
}

/// Order summaries slowest first by average latency.
///
/// The sort is stable: summaries with equal averages keep their order.
pub fn rank_by_avg(mut summaries: Vec<Summary>) -> Vec<Summary> {
    summaries.sort_by(|a, b| b.times.avg.total_cmp(&a.times.avg));
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RecordStream;
    use crate::document::Document;
    use crate::ops::create_default_registry;
    use crate::types::StoredRecord;
    use chrono::Utc;
    use std::cell::Cell;

    fn record(collection: &str, skeleton: Option<&str>, millis: i64) -> StoredRecord {
        StoredRecord {
            id: None,
            source_id: "src".to_string(),
            ns: format!("www.{}", collection),
            collection: collection.to_string(),
            op: OpKind::Query,
            skeleton: skeleton.map(str::to_string),
            sort_skeleton: Some("{}".to_string()),
            millis,
            ts: Utc::now(),
            client: None,
            user: None,
            query: Document::new(),
            sort: None,
            extra: Document::new(),
        }
    }

    /// Serves pre-sorted records and counts how many were pulled.
    struct VecReader {
        records: Vec<StoredRecord>,
        pulled: Cell<usize>,
    }

    impl VecReader {
        fn new(records: Vec<StoredRecord>) -> Self {
            Self {
                records,
                pulled: Cell::new(0),
            }
        }
    }

    impl SortedReader for VecReader {
        fn sorted_records<'a>(
            &'a self,
            _source_id: &str,
            _op: OpKind,
            collection: Option<&str>,
        ) -> Result<RecordStream<'a>> {
            let collection = collection.map(str::to_string);
            Ok(Box::new(
                self.records
                    .iter()
                    .filter(move |r| collection.as_deref().map_or(true, |c| r.collection == c))
                    .map(move |r| {
                        self.pulled.set(self.pulled.get() + 1);
                        Ok(r.clone())
                    }),
            ))
        }
    }

    #[test]
    fn test_group_and_summarize_end_to_end() {
        let reader = VecReader::new(vec![
            record("c", Some("S1"), 10),
            record("c", Some("S1"), 20),
            record("c", Some("S1"), 30),
            record("c", Some("S2"), 5),
            record("c", Some("S2"), 15),
        ]);
        let registry = create_default_registry();

        let summaries: Vec<Summary> = aggregate(&reader, &registry, "src", OpKind::Query, None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(summaries.len(), 2);

        let first = &summaries[0];
        assert_eq!(first.count, 3);
        assert_eq!(first.times.total, 60);
        assert_eq!(first.times.min, 10);
        assert_eq!(first.times.max, 30);
        assert_eq!(first.times.avg, 20.0);
        assert_eq!(first.times.median, 20);

        let second = &summaries[1];
        assert_eq!(second.count, 2);
        assert_eq!(second.times.total, 20);
        assert_eq!(second.times.min, 5);
        assert_eq!(second.times.max, 15);
        assert_eq!(second.times.avg, 10.0);
        assert_eq!(second.times.median, 15);
    }

    #[test]
    fn test_aggregate_is_lazy() {
        let mut records: Vec<StoredRecord> =
            (0..100).map(|i| record("c", Some(&format!("S{:03}", i)), i)).collect();
        records.sort_by(|a, b| a.skeleton.cmp(&b.skeleton));
        let reader = VecReader::new(records);
        let registry = create_default_registry();

        let first_two: Vec<Summary> = aggregate(&reader, &registry, "src", OpKind::Query, None)
            .unwrap()
            .take(2)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(first_two.len(), 2);
        assert!(reader.pulled.get() <= 3);
    }

    #[test]
    fn test_unextracted_records_are_singletons() {
        let reader = VecReader::new(vec![record("c", None, 1), record("c", None, 2)]);
        let registry = create_default_registry();
        let summaries: Vec<Summary> = aggregate(&reader, &registry, "src", OpKind::Query, None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.count == 1));
    }

    #[test]
    fn test_collection_filter() {
        let reader = VecReader::new(vec![
            record("a", Some("S1"), 1),
            record("b", Some("S1"), 2),
            record("b", Some("S1"), 3),
        ]);
        let registry = create_default_registry();
        let summaries: Vec<Summary> = aggregate(&reader, &registry, "src", OpKind::Query, Some("b"))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].count, 2);
        assert_eq!(summaries[0].record.collection, "b");
    }

    #[test]
    fn test_same_shape_in_two_collections() {
        let reader = VecReader::new(vec![
            record("a", Some("{x}"), 1),
            record("b", Some("{x}"), 2),
        ]);
        let registry = create_default_registry();
        let summaries: Vec<Summary> = aggregate(&reader, &registry, "src", OpKind::Query, None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].record.collection, "a");
        assert_eq!(summaries[0].count, 1);
        assert_eq!(summaries[1].record.collection, "b");
        assert_eq!(summaries[1].count, 1);
    }

    #[test]
    fn test_aggregate_without_handler() {
        let reader = VecReader::new(Vec::new());
        let registry = create_default_registry();
        let result = aggregate(&reader, &registry, "src", OpKind::Insert, None);
        assert!(matches!(result, Err(Error::NoHandler(OpKind::Insert))));
    }

    #[test]
    fn test_rank_by_avg() {
        let reader = VecReader::new(vec![
            record("c", Some("fast"), 1),
            record("c", Some("slow"), 90),
            record("c", Some("slow"), 110),
            record("c", Some("mid"), 50),
        ]);
        let registry = create_default_registry();
        let summaries: Vec<Summary> = aggregate(&reader, &registry, "src", OpKind::Query, None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        let ranked = rank_by_avg(summaries);
        let order: Vec<&str> = ranked
            .iter()
            .map(|s| s.record.skeleton.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(order, vec!["slow", "mid", "fast"]);
    }
}
