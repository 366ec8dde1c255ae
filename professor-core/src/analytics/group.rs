//! Streaming partition of sorted records into groups

use crate::error::Result;
use crate::types::StoredRecord;

/// A non-empty run of records sharing one grouping key.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    records: Vec<StoredRecord>,
}

impl Group {
    /// Wrap records into a group; `None` if `records` is empty.
    pub fn new(records: Vec<StoredRecord>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(Self { records })
        }
    }

    /// The first record of the group
    pub fn first(&self) -> &StoredRecord {
        &self.records[0]
    }

    /// Number of records (always at least one)
    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[StoredRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<StoredRecord> {
        self.records
    }
}

/// Lazy iterator over groups of a sorted record stream.
///
/// Created by [`group_records`]. Holds at most one open group in memory.
pub struct Groups<I, F> {
    records: I,
    same_group: F,
    open: Vec<StoredRecord>,
    done: bool,
}

/// Partition a sorted record stream into groups.
///
/// Records are read one at a time. Whenever `same_group(previous, current)`
/// is false, the group collected so far is yielded and `current` starts a new
/// one. The final group is yielded when the input ends.
///
/// The input is only advanced as far as needed to complete the next group,
/// so a caller that stops early never reads the rest of it. An input error is
/// yielded in place and ends the iteration; the partially collected group is
/// discarded.
pub fn group_records<I, F>(records: I, same_group: F) -> Groups<I::IntoIter, F>
where
    I: IntoIterator<Item = Result<StoredRecord>>,
    F: FnMut(&StoredRecord, &StoredRecord) -> bool,
{
    Groups {
        records: records.into_iter(),
        same_group,
        open: Vec::new(),
        done: false,
    }
}

impl<I, F> Iterator for Groups<I, F>
where
    I: Iterator<Item = Result<StoredRecord>>,
    F: FnMut(&StoredRecord, &StoredRecord) -> bool,
{
    type Item = Result<Group>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match self.records.next() {
                Some(Ok(record)) => {
                    let boundary = match self.open.last() {
                        Some(previous) => !(self.same_group)(previous, &record),
                        None => false,
                    };
                    if boundary {
                        let finished = std::mem::replace(&mut self.open, vec![record]);
                        return Group::new(finished).map(Ok);
                    }
                    self.open.push(record);
                }
                Some(Err(e)) => {
                    self.done = true;
                    self.open.clear();
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return Group::new(std::mem::take(&mut self.open)).map(Ok);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::error::Error;
    use crate::types::OpKind;
    use chrono::Utc;
    use std::cell::Cell;

    fn record(skeleton: Option<&str>, millis: i64) -> StoredRecord {
        StoredRecord {
            id: None,
            source_id: "src".to_string(),
            ns: "db.c".to_string(),
            collection: "c".to_string(),
            op: OpKind::Query,
            skeleton: skeleton.map(str::to_string),
            sort_skeleton: None,
            millis,
            ts: Utc::now(),
            client: None,
            user: None,
            query: Document::new(),
            sort: None,
            extra: Document::new(),
        }
    }

    fn same_skeleton(a: &StoredRecord, b: &StoredRecord) -> bool {
        a.skeleton.is_some() && a.skeleton == b.skeleton
    }

    fn millis_of(group: &Group) -> Vec<i64> {
        group.records().iter().map(|r| r.millis).collect()
    }

    #[test]
    fn test_groups_follow_runs() {
        let records = vec![
            record(Some("{a}"), 1),
            record(Some("{a}"), 2),
            record(Some("{b}"), 3),
            record(Some("{a}"), 4),
        ];
        let groups: Vec<Group> = group_records(records.into_iter().map(Ok), same_skeleton)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(groups.len(), 3);
        assert_eq!(millis_of(&groups[0]), vec![1, 2]);
        assert_eq!(millis_of(&groups[1]), vec![3]);
        assert_eq!(millis_of(&groups[2]), vec![4]);
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let mut groups = group_records(Vec::new(), same_skeleton);
        assert!(groups.next().is_none());
    }

    #[test]
    fn test_missing_skeletons_never_group() {
        let records = vec![record(None, 1), record(None, 2), record(None, 3)];
        let groups: Vec<Group> = group_records(records.into_iter().map(Ok), same_skeleton)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.count() == 1));
    }

    #[test]
    fn test_stops_reading_when_caller_stops() {
        let pulled = Cell::new(0);
        let source = (0..1_000).map(|i| {
            pulled.set(pulled.get() + 1);
            let skeleton = if i < 3 { "{a}" } else { "{b}" };
            Ok(record(Some(skeleton), i))
        });

        let first = group_records(source, same_skeleton).next().unwrap().unwrap();
        assert_eq!(first.count(), 3);
        // three records of the first group plus the one that closed it
        assert_eq!(pulled.get(), 4);
    }

    #[test]
    fn test_error_ends_iteration() {
        let records = vec![
            Ok(record(Some("{a}"), 1)),
            Err(Error::Codec("bad row".to_string())),
            Ok(record(Some("{a}"), 2)),
        ];
        let mut groups = group_records(records, same_skeleton);
        assert!(matches!(groups.next(), Some(Err(Error::Codec(_)))));
        assert!(groups.next().is_none());
    }

    #[test]
    fn test_group_requires_records() {
        assert!(Group::new(Vec::new()).is_none());
        let group = Group::new(vec![record(Some("{a}"), 5)]).unwrap();
        assert_eq!(group.first().millis, 5);
    }
}
