//! Migration outcomes and cumulative reporting
//!
//! Every `run_batch` call returns a [`MigrationOutcome`] describing one page
//! of one scope. The drive loop folds outcomes into a [`MigrationReport`]
//! that spans all scopes.
//!
//! # Usage
//!
//! ```rust,ignore
//! use hidden_layout_migrate::{MigrationReport, ScopeKind};
//!
//! let mut report = MigrationReport::new(false);
//! report.absorb(&outcome);
//! report.complete();
//!
//! println!("{} migrated, {} not migrated", report.total_migrated(), report.total_not_migrated());
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::scope::ScopeKind;

/// Outcome of one batch in one scope
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOutcome {
    pub scope: ScopeKind,
    /// Last scanned id, to be resupplied on the next call
    pub cursor: u64,
    /// True iff the scan returned an empty page
    pub exhausted: bool,
    /// Whether this was a dry run (no writes, no deletes)
    pub dry_run: bool,
    /// Positions now reflected in canonical storage
    pub total_migrated: u32,
    /// Positions left in legacy storage because absorption failed
    pub not_migrated: u32,
    /// Legacy row ids that were safe to delete
    pub deletable_ids: Vec<u64>,
    /// Rows actually removed by the bulk delete
    pub deleted: usize,
    /// Canonical records written in this batch
    pub written: u32,
    /// Hidden-valued candidates whose key did not parse
    pub skipped_unparseable: u32,
    /// Candidates whose value was not the hidden sentinel
    pub skipped_not_hidden: u32,
    /// One entry per destination/field group touched
    pub groups: Vec<GroupLog>,
    /// Per-group diagnostics
    pub errors: Vec<MigrationError>,
}

impl MigrationOutcome {
    /// Outcome of a batch that found nothing left to scan
    pub fn exhausted(scope: ScopeKind, cursor: u64, dry_run: bool) -> Self {
        Self {
            exhausted: true,
            ..Self::empty(scope, cursor, dry_run)
        }
    }

    pub(crate) fn empty(scope: ScopeKind, cursor: u64, dry_run: bool) -> Self {
        Self {
            scope,
            cursor,
            exhausted: false,
            dry_run,
            total_migrated: 0,
            not_migrated: 0,
            deletable_ids: Vec::new(),
            deleted: 0,
            written: 0,
            skipped_unparseable: 0,
            skipped_not_hidden: 0,
            groups: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// More pages may follow in this scope
    pub fn has_more(&self) -> bool {
        !self.exhausted
    }

    /// "N migrated, M not migrated"
    pub fn summary(&self) -> String {
        format!(
            "{} migrated, {} not migrated",
            self.total_migrated, self.not_migrated
        )
    }
}

/// What happened to one destination/field group
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    /// Merged record was written
    Written,
    /// Canonical record already contained every position
    AlreadyMigrated,
    /// Dry run: a write would have been made
    WouldWrite,
    /// Read, write or verification failed; legacy rows kept
    Failed,
}

/// Audit entry for one destination/field group
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupLog {
    /// Object reference (`"42"`, `"term_7"`, `"user_3"`, `"options"`)
    pub destination: String,
    pub field_name: String,
    /// Positions discovered in legacy rows this batch
    pub positions: Vec<u32>,
    /// Final disabled list (what is, or would be, stored)
    pub disabled: Vec<u32>,
    /// Legacy row ids backing this group
    pub legacy_ids: Vec<u64>,
    pub status: GroupStatus,
}

/// A single per-group diagnostic
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationError {
    pub scope: ScopeKind,
    pub destination: String,
    pub field_name: String,
    /// Which phase the error occurred in
    pub phase: MigrationPhase,
    /// Human-readable error message
    pub message: String,
}

/// Phase of a batch where an error occurred
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    /// Reading or decoding the existing canonical record
    Read,
    /// Persisting the merged record
    Write,
    /// Re-checking canonical storage before deletion
    Verify,
}

/// Counts for a single scope
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScopeCounts {
    pub batches: u32,
    pub migrated: u32,
    pub not_migrated: u32,
    pub written: u32,
    pub deleted: u64,
    pub skipped: u32,
    /// Last cursor reached
    pub cursor: u64,
    pub exhausted: bool,
}

/// Cumulative report across all scopes and batches
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub dry_run: bool,
    /// When the drive loop started (RFC 3339)
    pub started_at: String,
    /// When it finished (None if still running)
    pub completed_at: Option<String>,
    pub scopes: BTreeMap<ScopeKind, ScopeCounts>,
    pub errors: Vec<MigrationError>,
}

impl MigrationReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            scopes: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    /// Fold one batch outcome into the totals
    pub fn absorb(&mut self, outcome: &MigrationOutcome) {
        let counts = self.scopes.entry(outcome.scope).or_default();
        counts.batches += 1;
        counts.migrated += outcome.total_migrated;
        counts.not_migrated += outcome.not_migrated;
        counts.written += outcome.written;
        counts.deleted += outcome.deleted as u64;
        counts.skipped += outcome.skipped_unparseable + outcome.skipped_not_hidden;
        counts.cursor = outcome.cursor;
        counts.exhausted = outcome.exhausted;
        self.errors.extend(outcome.errors.iter().cloned());
    }

    /// Mark the run as complete
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now().to_rfc3339());
    }

    /// Every scope seen so far reported exhaustion
    pub fn all_exhausted(&self) -> bool {
        self.scopes.values().all(|c| c.exhausted)
    }

    /// No position was left behind
    pub fn is_success(&self) -> bool {
        self.total_not_migrated() == 0 && self.errors.is_empty()
    }

    pub fn total_migrated(&self) -> u32 {
        self.scopes.values().map(|c| c.migrated).sum()
    }

    pub fn total_not_migrated(&self) -> u32 {
        self.scopes.values().map(|c| c.not_migrated).sum()
    }

    pub fn total_deleted(&self) -> u64 {
        self.scopes.values().map(|c| c.deleted).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} migrated, {} not migrated",
            self.total_migrated(),
            self.total_not_migrated()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_absorbs_outcomes() {
        let mut report = MigrationReport::new(false);

        let mut first = MigrationOutcome::empty(ScopeKind::Post, 10, false);
        first.total_migrated = 3;
        first.deleted = 3;
        first.written = 1;
        report.absorb(&first);

        let mut second = MigrationOutcome::empty(ScopeKind::Post, 20, false);
        second.total_migrated = 1;
        second.not_migrated = 2;
        second.errors.push(MigrationError {
            scope: ScopeKind::Post,
            destination: "42".to_string(),
            field_name: "hero".to_string(),
            phase: MigrationPhase::Write,
            message: "disk full".to_string(),
        });
        report.absorb(&second);

        let counts = report.scopes.get(&ScopeKind::Post).unwrap();
        assert_eq!(counts.batches, 2);
        assert_eq!(counts.cursor, 20);
        assert_eq!(report.total_migrated(), 4);
        assert_eq!(report.total_not_migrated(), 2);
        assert_eq!(report.total_deleted(), 3);
        assert!(!report.is_success());
        assert_eq!(report.summary(), "4 migrated, 2 not migrated");
    }

    #[test]
    fn test_exhausted_outcome() {
        let outcome = MigrationOutcome::exhausted(ScopeKind::Term, 7, false);

        assert!(!outcome.has_more());
        assert_eq!(outcome.cursor, 7);
        assert_eq!(outcome.total_migrated, 0);
        assert_eq!(outcome.summary(), "0 migrated, 0 not migrated");
    }

    #[test]
    fn test_outcome_serializes_camel_case() {
        let outcome = MigrationOutcome::empty(ScopeKind::Options, 0, true);
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["scope"], "options");
        assert!(json.get("totalMigrated").is_some());
        assert!(json.get("notMigrated").is_some());
    }
}
