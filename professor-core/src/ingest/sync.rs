//! Incremental, watermark-driven sync passes

use super::{IngestOutcome, ProfileSource, RecordCursor, RecordIngestor, SkipReason, SyncWindow};
use crate::config::ErrorPolicy;
use crate::db::PersistenceSink;
use crate::error::{Error, Result};
use crate::ops::OpRegistry;
use crate::types::{RawRecord, SourceDescriptor};
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Result of one sync pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// The window that was scanned
    pub window: SyncWindow,
    /// Records normalized and persisted
    pub accepted: usize,
    /// Records dropped as administrative or temporary
    pub skipped_internal: usize,
    /// Records the cursor returned outside the window; ignored
    pub out_of_window: usize,
    /// Errors of records skipped under [`ErrorPolicy::Skip`]
    pub errors: Vec<String>,
}

impl SyncReport {
    fn new(window: SyncWindow) -> Self {
        Self {
            window,
            accepted: 0,
            skipped_internal: 0,
            out_of_window: 0,
            errors: Vec::new(),
        }
    }

    /// Number of records rejected under [`ErrorPolicy::Skip`]
    pub fn rejected(&self) -> usize {
        self.errors.len()
    }
}

/// What happened to one cursor item
enum Processed {
    Accepted,
    Skipped(SkipReason),
    OutOfWindow(DateTime<Utc>),
}

/// Drives sync passes of monitored sources.
///
/// Each pass scans `[last_sync_at, now)` where `now` is taken when the pass
/// starts, then moves the watermark to `now`. Records captured while a pass
/// runs fall into the next pass's window, so nothing is counted twice or
/// missed.
///
/// The records of a pass and its new watermark are written in one sink
/// batch. An aborted pass rolls the batch back, so a retry of the same
/// window does not store its records a second time.
///
/// At most one pass per source runs at a time in this process; a second one
/// fails with [`Error::SyncInProgress`].
pub struct SyncTracker {
    registry: OpRegistry,
    policy: ErrorPolicy,
    in_flight: Mutex<HashSet<String>>,
}

impl SyncTracker {
    /// Create a tracker that aborts a pass on the first bad record.
    pub fn new(registry: OpRegistry) -> Self {
        Self {
            registry,
            policy: ErrorPolicy::Abort,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Run one pass for `source` ending at the current time.
    ///
    /// On success `source.last_sync_at` has advanced and the source has been
    /// saved through `sink`. On error the watermark is left untouched.
    pub fn sync_once(
        &self,
        source: &mut SourceDescriptor,
        profiles: &dyn ProfileSource,
        sink: &dyn PersistenceSink,
    ) -> Result<SyncReport> {
        self.sync_once_at(source, profiles, sink, Utc::now())
    }

    /// Run one pass for `source` ending at `now`.
    ///
    /// `now` is truncated to microseconds, the precision watermarks are
    /// stored with.
    pub fn sync_once_at(
        &self,
        source: &mut SourceDescriptor,
        profiles: &dyn ProfileSource,
        sink: &dyn PersistenceSink,
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        let _guard = InFlightGuard::acquire(&self.in_flight, &source.id)?;

        let now = now.trunc_subsecs(6);
        let window = SyncWindow::new(source.last_sync_at, now);
        let kinds = self.registry.kinds();
        let ingestor = RecordIngestor::new(&self.registry);
        let report = SyncReport::new(window);

        tracing::info!(
            source = %source.display_name(),
            since = ?window.since,
            until = %window.until,
            "Starting sync"
        );

        let cursor = profiles.profiles(source, &window, &kinds)?;
        sink.begin()?;
        let (report, watermark) = match self.run_pass(&ingestor, source, sink, report, cursor) {
            Ok(done) => done,
            Err(e) => {
                if let Err(rollback_err) = sink.rollback() {
                    tracing::error!(error = %rollback_err, "Rollback failed");
                }
                tracing::warn!(
                    source = %source.display_name(),
                    error = %e,
                    "Sync aborted, watermark unchanged"
                );
                return Err(e);
            }
        };
        if let Err(e) = sink.commit() {
            if let Err(rollback_err) = sink.rollback() {
                tracing::error!(error = %rollback_err, "Rollback failed");
            }
            return Err(e);
        }
        source.last_sync_at = Some(watermark);

        tracing::info!(
            source = %source.display_name(),
            accepted = report.accepted,
            skipped_internal = report.skipped_internal,
            rejected = report.rejected(),
            watermark = %watermark,
            "Sync complete"
        );

        Ok(report)
    }

    /// Ingest every cursor item and save the advanced source, all inside the
    /// sink's open batch. Returns the report and the new watermark.
    fn run_pass(
        &self,
        ingestor: &RecordIngestor<'_>,
        source: &SourceDescriptor,
        sink: &dyn PersistenceSink,
        mut report: SyncReport,
        cursor: RecordCursor<'_>,
    ) -> Result<(SyncReport, DateTime<Utc>)> {
        let window = report.window;
        for item in cursor {
            match Self::process(ingestor, source, sink, &window, item) {
                Ok(Processed::Accepted) => report.accepted += 1,
                Ok(Processed::Skipped(SkipReason::InternalNamespace { collection })) => {
                    tracing::debug!(collection = %collection, "Skipping internal namespace");
                    report.skipped_internal += 1;
                }
                Ok(Processed::OutOfWindow(ts)) => {
                    tracing::warn!(ts = %ts, "Cursor returned record outside sync window");
                    report.out_of_window += 1;
                }
                Err(e) => match self.policy {
                    ErrorPolicy::Abort => return Err(e),
                    ErrorPolicy::Skip => {
                        tracing::warn!(error = %e, "Rejected record");
                        report.errors.push(e.to_string());
                    }
                },
            }
        }

        let watermark = source
            .last_sync_at
            .map_or(window.until, |last| last.max(window.until));
        let mut advanced = source.clone();
        advanced.last_sync_at = Some(watermark);
        sink.save_source(&advanced)?;

        Ok((report, watermark))
    }

    fn process(
        ingestor: &RecordIngestor<'_>,
        source: &SourceDescriptor,
        sink: &dyn PersistenceSink,
        window: &SyncWindow,
        item: Result<RawRecord>,
    ) -> Result<Processed> {
        let raw = item?;
        if !window.contains(raw.ts) {
            return Ok(Processed::OutOfWindow(raw.ts));
        }

        match ingestor.ingest(source, raw)? {
            IngestOutcome::Accepted(record) => {
                sink.save_record(&record)?;
                Ok(Processed::Accepted)
            }
            IngestOutcome::Skipped(reason) => Ok(Processed::Skipped(reason)),
        }
    }
}

/// Marks a source as syncing until dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    source_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<String>>, source_id: &str) -> Result<Self> {
        let inserted = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_id.to_string());
        if !inserted {
            return Err(Error::SyncInProgress(source_id.to_string()));
        }
        Ok(Self {
            in_flight,
            source_id: source_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.source_id);
    }
}
