//! Result-reporting sinks
//!
//! After every batch the drive loop hands a [`BatchNotice`] to a
//! [`ReportSink`]: the scope, the cursor to resume from, whether more pages
//! remain, the counts, and the destination/field groups that were touched.

use serde::Serialize;
use std::io::Write;
use tracing::{info, warn};

use crate::error::MigrateError;
use crate::report::{GroupLog, MigrationOutcome};
use crate::scope::ScopeKind;

/// Per-batch notification payload
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchNotice<'a> {
    pub scope: ScopeKind,
    pub cursor: u64,
    pub has_more: bool,
    pub dry_run: bool,
    pub total_migrated: u32,
    pub not_migrated: u32,
    pub deleted: usize,
    pub groups: &'a [GroupLog],
}

impl<'a> From<&'a MigrationOutcome> for BatchNotice<'a> {
    fn from(outcome: &'a MigrationOutcome) -> Self {
        Self {
            scope: outcome.scope,
            cursor: outcome.cursor,
            has_more: outcome.has_more(),
            dry_run: outcome.dry_run,
            total_migrated: outcome.total_migrated,
            not_migrated: outcome.not_migrated,
            deleted: outcome.deleted,
            groups: &outcome.groups,
        }
    }
}

/// Receives one notice per completed batch
pub trait ReportSink {
    fn batch_completed(&mut self, notice: &BatchNotice<'_>) -> Result<(), MigrateError>;
}

/// Logs each batch through `tracing`
#[derive(Debug, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn batch_completed(&mut self, notice: &BatchNotice<'_>) -> Result<(), MigrateError> {
        info!(
            scope = %notice.scope,
            cursor = notice.cursor,
            has_more = notice.has_more,
            dry_run = notice.dry_run,
            migrated = notice.total_migrated,
            not_migrated = notice.not_migrated,
            deleted = notice.deleted,
            groups = notice.groups.len(),
            "Batch complete"
        );
        if notice.not_migrated > 0 {
            warn!(
                scope = %notice.scope,
                not_migrated = notice.not_migrated,
                "Some hidden layouts stay in legacy storage until a retry succeeds"
            );
        }
        Ok(())
    }
}

/// Writes each notice as one JSON line
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for JsonLinesSink<W> {
    fn batch_completed(&mut self, notice: &BatchNotice<'_>) -> Result<(), MigrateError> {
        serde_json::to_writer(&mut self.out, notice)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Owned copy of a notice, kept by [`MemorySink`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedBatch {
    pub scope: ScopeKind,
    pub cursor: u64,
    pub has_more: bool,
    pub total_migrated: u32,
    pub not_migrated: u32,
    pub groups: Vec<GroupLog>,
}

/// Collects notices in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub batches: Vec<RecordedBatch>,
}

impl ReportSink for MemorySink {
    fn batch_completed(&mut self, notice: &BatchNotice<'_>) -> Result<(), MigrateError> {
        self.batches.push(RecordedBatch {
            scope: notice.scope,
            cursor: notice.cursor,
            has_more: notice.has_more,
            total_migrated: notice.total_migrated,
            not_migrated: notice.not_migrated,
            groups: notice.groups.to_vec(),
        });
        Ok(())
    }
}

/// Fans a notice out to two sinks
pub struct Tee<A, B>(pub A, pub B);

impl<A: ReportSink, B: ReportSink> ReportSink for Tee<A, B> {
    fn batch_completed(&mut self, notice: &BatchNotice<'_>) -> Result<(), MigrateError> {
        self.0.batch_completed(notice)?;
        self.1.batch_completed(notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_lines_sink() {
        let mut outcome = MigrationOutcome::empty(ScopeKind::User, 12, false);
        outcome.total_migrated = 2;

        let mut sink = JsonLinesSink::new(Vec::new());
        sink.batch_completed(&BatchNotice::from(&outcome)).unwrap();

        let line = String::from_utf8(sink.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["scope"], "user");
        assert_eq!(value["cursor"], 12);
        assert_eq!(value["hasMore"], true);
        assert_eq!(value["totalMigrated"], 2);
    }

    #[test]
    fn test_tee_feeds_both_sinks() {
        let outcome = MigrationOutcome::exhausted(ScopeKind::Options, 3, false);
        let mut tee = Tee(MemorySink::default(), MemorySink::default());

        tee.batch_completed(&BatchNotice::from(&outcome)).unwrap();

        assert_eq!(tee.0.batches.len(), 1);
        assert_eq!(tee.1.batches.len(), 1);
        assert!(!tee.1.batches[0].has_more);
    }
}
