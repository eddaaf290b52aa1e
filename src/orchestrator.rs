//! Migration orchestrator
//!
//! Manages the migration workflow for one page of one scope:
//! 1. Scan a page of legacy rows
//! 2. Parse keys and group hidden flags by destination/field
//! 3. Merge each group into its canonical record
//! 4. Write changed records, isolating failures per group
//! 5. Verify, then bulk-delete only the rows that were absorbed
//!
//! [`Migrator::run`] drives `run_batch` across all scopes in the fixed
//! order and folds the outcomes into a [`MigrationReport`].
//!
//! # Usage
//!
//! ```rust,ignore
//! let store = WpStore::open(Path::new("site.db"), "wp_")?;
//! let migrator = Migrator::new(MigrationConfig::default());
//!
//! // One page at a time, cursor tracked by the caller
//! let outcome = migrator.run_batch(&store.scope(ScopeKind::Post), 0)?;
//! println!("{} (next cursor {})", outcome.summary(), outcome.cursor);
//!
//! // Or everything at once
//! let scopes = store.scopes();
//! let adapters: Vec<&dyn ScopeAdapter> = scopes.iter().map(|s| s as &dyn ScopeAdapter).collect();
//! let report = migrator.run(&adapters, &mut TracingSink)?;
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

use crate::config::MigrationConfig;
use crate::error::MigrateError;
use crate::key_parser::parse_legacy_key;
use crate::layout_meta::{merge, MergeResult};
use crate::report::{
    GroupLog, GroupStatus, MigrationError, MigrationOutcome, MigrationPhase, MigrationReport,
};
use crate::scanner;
use crate::scope::ScopeKind;
use crate::sink::{BatchNotice, ReportSink};
use crate::traits::{ScopeAdapter, WriteOutcome};

/// Where a drive loop stopped
///
/// Never persisted by the engine; callers store it and hand it back to
/// [`Migrator::run_from`] to resume.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationProgress {
    /// Scope being drained (None = every scope exhausted)
    pub scope: Option<ScopeKind>,
    /// Last processed id within `scope`
    pub cursor: u64,
}

impl MigrationProgress {
    /// Progress at the very beginning of the given scope order
    pub fn start(order: &[ScopeKind]) -> Self {
        Self {
            scope: order.first().copied(),
            cursor: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.scope.is_none()
    }

    /// Move past a completed batch
    pub fn advance(&mut self, notice: &BatchNotice<'_>, order: &[ScopeKind]) {
        if notice.has_more {
            self.scope = Some(notice.scope);
            self.cursor = notice.cursor;
        } else {
            self.scope = next_scope(notice.scope, order);
            self.cursor = 0;
        }
    }
}

fn next_scope(current: ScopeKind, order: &[ScopeKind]) -> Option<ScopeKind> {
    order.iter().copied().find(|s| *s > current)
}

/// Legacy rows that map to one destination/field
#[derive(Debug, Default)]
struct PendingGroup {
    positions: BTreeSet<u32>,
    ids: Vec<u64>,
}

/// A group whose rows are currently marked deletable
struct Absorbed {
    owner: u64,
    log_index: usize,
    positions: BTreeSet<u32>,
}

/// Runs migration batches against scope adapters
pub struct Migrator {
    config: MigrationConfig,
}

impl Migrator {
    pub fn new(config: MigrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Refuse to run unless canonical layout meta storage is available
    pub fn check_preconditions<A: ScopeAdapter + ?Sized>(
        &self,
        adapter: &A,
    ) -> Result<(), MigrateError> {
        let required = &self.config.min_layout_meta_version;

        match adapter.layout_meta_version()? {
            Some(installed) if version_at_least(&installed, required) => {
                debug!(
                    scope = %adapter.kind(),
                    installed = installed.as_str(),
                    "Layout meta support detected"
                );
                Ok(())
            }
            Some(installed) => {
                error!(
                    installed = installed.as_str(),
                    required = required.as_str(),
                    "Layout meta provider too old"
                );
                Err(MigrateError::PreconditionUnmet(format!(
                    "Required canonical layout meta support is not available: \
                     version {} installed, {} or newer required",
                    installed, required
                )))
            }
            None => {
                error!(required = required.as_str(), "Layout meta provider not installed");
                Err(MigrateError::PreconditionUnmet(format!(
                    "Required canonical layout meta support is not available: \
                     version {} or newer must be active",
                    required
                )))
            }
        }
    }

    /// Number of hidden-valued legacy candidates left after `cursor`
    pub fn estimate_remaining<A: ScopeAdapter + ?Sized>(
        &self,
        adapter: &A,
        cursor: u64,
    ) -> Result<u64, MigrateError> {
        adapter.count_candidates(cursor)
    }

    /// Migrate the next page of one scope
    pub fn run_batch<A: ScopeAdapter + ?Sized>(
        &self,
        adapter: &A,
        cursor: u64,
    ) -> Result<MigrationOutcome, MigrateError> {
        self.check_preconditions(adapter)?;

        let scope = adapter.kind();
        let dry_run = self.config.dry_run;
        let page = scanner::next_batch(adapter, cursor, self.config.effective_page_size())?;

        if page.exhausted {
            info!(scope = %scope, cursor, "No legacy rows left");
            return Ok(MigrationOutcome::exhausted(scope, cursor, dry_run));
        }

        let mut outcome = MigrationOutcome::empty(scope, page.cursor, dry_run);
        outcome.skipped_not_hidden = page.not_hidden as u32;

        let mut groups: BTreeMap<(u64, String), PendingGroup> = BTreeMap::new();
        for record in page.records {
            let Some(parsed) = parse_legacy_key(&record.key, scope) else {
                debug!(
                    scope = %scope,
                    id = record.id,
                    key = record.key.as_str(),
                    "Skipping unparseable key"
                );
                outcome.skipped_unparseable += 1;
                continue;
            };
            let group = groups.entry((record.owner, parsed.field_name)).or_default();
            group.positions.insert(parsed.position);
            group.ids.push(record.id);
        }

        let mut absorbed = Vec::new();
        for ((owner, field), group) in groups {
            let absorbed_positions = self.absorb_group(adapter, &mut outcome, owner, &field, group);
            if let Some(positions) = absorbed_positions {
                absorbed.push(Absorbed {
                    owner,
                    log_index: outcome.groups.len() - 1,
                    positions,
                });
            }
        }

        if !dry_run && self.config.verify_before_delete {
            absorbed = self.verify_absorbed(adapter, &mut outcome, absorbed);
        }

        let mut deletable: Vec<u64> = absorbed
            .iter()
            .flat_map(|a| outcome.groups[a.log_index].legacy_ids.iter().copied())
            .collect();
        deletable.sort_unstable();

        // Dry runs report what would be deleted but never delete
        if !dry_run && !deletable.is_empty() {
            outcome.deleted = adapter.delete_by_ids(&deletable)?;
            debug!(
                scope = %scope,
                requested = deletable.len(),
                deleted = outcome.deleted,
                "Deleted absorbed legacy rows"
            );
        }
        outcome.deletable_ids = deletable;

        info!(
            scope = %scope,
            from = cursor,
            to = outcome.cursor,
            dry_run,
            migrated = outcome.total_migrated,
            not_migrated = outcome.not_migrated,
            written = outcome.written,
            deleted = outcome.deleted,
            "Batch migrated"
        );

        Ok(outcome)
    }

    /// Merge and persist one group, returning its positions if the rows may be deleted
    fn absorb_group<A: ScopeAdapter + ?Sized>(
        &self,
        adapter: &A,
        outcome: &mut MigrationOutcome,
        owner: u64,
        field: &str,
        group: PendingGroup,
    ) -> Option<BTreeSet<u32>> {
        let destination = adapter.destination(owner);
        let count = group.positions.len() as u32;
        let mut log = GroupLog {
            destination: destination.clone(),
            field_name: field.to_string(),
            positions: group.positions.iter().copied().collect(),
            disabled: Vec::new(),
            legacy_ids: group.ids,
            status: GroupStatus::Failed,
        };

        let existing = match adapter.read_canonical(owner, field) {
            Ok(existing) => existing,
            Err(e) => {
                warn!(
                    scope = %outcome.scope,
                    destination = destination.as_str(),
                    field,
                    error = %e,
                    "Could not read layout meta"
                );
                record_failure(outcome, log, count, MigrationPhase::Read, e);
                return None;
            }
        };

        let MergeResult { merged, changed } = merge(existing.as_ref(), &group.positions);
        log.disabled = merged.disabled_sorted();

        let status = if !changed {
            debug!(
                destination = destination.as_str(),
                field,
                "Layout meta already contains hidden positions"
            );
            GroupStatus::AlreadyMigrated
        } else if self.config.dry_run {
            GroupStatus::WouldWrite
        } else {
            match adapter.write_canonical(owner, field, &merged) {
                Ok(WriteOutcome::Written) => {
                    debug!(
                        destination = destination.as_str(),
                        field,
                        disabled = ?log.disabled,
                        "Wrote layout meta"
                    );
                    outcome.written += 1;
                    GroupStatus::Written
                }
                Ok(WriteOutcome::Unchanged) => GroupStatus::AlreadyMigrated,
                Err(e) => {
                    warn!(
                        scope = %outcome.scope,
                        destination = destination.as_str(),
                        field,
                        error = %e,
                        "Layout meta write failed"
                    );
                    record_failure(outcome, log, count, MigrationPhase::Write, e);
                    return None;
                }
            }
        };

        log.status = status;
        outcome.total_migrated += count;
        outcome.groups.push(log);
        Some(group.positions)
    }

    /// Re-read canonical records and drop any group that is not fully reflected
    fn verify_absorbed<A: ScopeAdapter + ?Sized>(
        &self,
        adapter: &A,
        outcome: &mut MigrationOutcome,
        absorbed: Vec<Absorbed>,
    ) -> Vec<Absorbed> {
        let mut verified = Vec::with_capacity(absorbed.len());

        for group in absorbed {
            let field = outcome.groups[group.log_index].field_name.clone();
            let problem = match adapter.read_canonical(group.owner, &field) {
                Ok(Some(meta)) if meta.covers(&group.positions) => None,
                Ok(Some(_)) => Some("stored layout meta is missing hidden positions".to_string()),
                Ok(None) => Some("stored layout meta disappeared".to_string()),
                Err(e) => Some(e.to_string()),
            };

            let Some(message) = problem else {
                verified.push(group);
                continue;
            };

            let count = group.positions.len() as u32;
            let log = &mut outcome.groups[group.log_index];
            let was_written = log.status == GroupStatus::Written;
            log.status = GroupStatus::Failed;
            let destination = log.destination.clone();

            warn!(
                scope = %outcome.scope,
                destination = destination.as_str(),
                field = field.as_str(),
                message = message.as_str(),
                "Verification failed, keeping legacy rows"
            );
            if was_written {
                outcome.written -= 1;
            }
            outcome.total_migrated -= count;
            outcome.not_migrated += count;
            outcome.errors.push(MigrationError {
                scope: outcome.scope,
                destination,
                field_name: field,
                phase: MigrationPhase::Verify,
                message,
            });
        }

        verified
    }

    /// Drain every configured scope from the beginning
    pub fn run(
        &self,
        adapters: &[&dyn ScopeAdapter],
        sink: &mut dyn ReportSink,
    ) -> Result<MigrationReport, MigrateError> {
        let mut progress = MigrationProgress::start(&self.config.scope_order());
        self.run_from(&mut progress, adapters, sink)
    }

    /// Drain configured scopes starting at `progress`, updating it after each batch
    ///
    /// Stops when every scope is exhausted or `max_batches` is reached. On
    /// error `progress` still points at the last completed batch.
    pub fn run_from(
        &self,
        progress: &mut MigrationProgress,
        adapters: &[&dyn ScopeAdapter],
        sink: &mut dyn ReportSink,
    ) -> Result<MigrationReport, MigrateError> {
        let order = self.config.scope_order();
        let mut report = MigrationReport::new(self.config.dry_run);
        let mut batches = 0u32;

        info!(
            scopes = ?order,
            start = ?progress.scope,
            cursor = progress.cursor,
            dry_run = self.config.dry_run,
            "Starting migration"
        );

        while let Some(scope) = progress.scope {
            if !self.config.should_migrate(scope) {
                progress.scope = next_scope(scope, &order);
                progress.cursor = 0;
                continue;
            }
            if self.config.max_batches.is_some_and(|max| batches >= max) {
                info!(batches, "Batch limit reached, stopping");
                break;
            }

            let adapter = adapters
                .iter()
                .find(|a| a.kind() == scope)
                .ok_or_else(|| {
                    MigrateError::Config(format!("No adapter registered for scope {}", scope))
                })?;

            let outcome = self.run_batch(*adapter, progress.cursor)?;
            batches += 1;

            report.absorb(&outcome);
            let notice = BatchNotice::from(&outcome);
            sink.batch_completed(&notice)?;
            progress.advance(&notice, &order);
        }

        if progress.is_finished() {
            report.complete();
            info!(
                summary = report.summary().as_str(),
                deleted = report.total_deleted(),
                "Migration complete"
            );
        }

        Ok(report)
    }
}

fn record_failure(
    outcome: &mut MigrationOutcome,
    mut log: GroupLog,
    count: u32,
    phase: MigrationPhase,
    err: MigrateError,
) {
    log.status = GroupStatus::Failed;
    outcome.not_migrated += count;
    outcome.errors.push(MigrationError {
        scope: outcome.scope,
        destination: log.destination.clone(),
        field_name: log.field_name.clone(),
        phase,
        message: err.to_string(),
    });
    outcome.groups.push(log);
}

/// Compare dotted version strings numerically (`6.10` > `6.9`)
///
/// Non-numeric suffixes such as `-beta` are ignored.
fn version_at_least(installed: &str, required: &str) -> bool {
    fn parts(v: &str) -> Vec<u32> {
        v.trim()
            .split('.')
            .map(|seg| {
                let digits: String = seg.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse().unwrap_or(0)
            })
            .collect()
    }

    let (a, b) = (parts(installed), parts(required));
    let len = a.len().max(b.len());
    for i in 0..len {
        let (x, y) = (a.get(i).copied().unwrap_or(0), b.get(i).copied().unwrap_or(0));
        if x != y {
            return x > y;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_at_least() {
        assert!(version_at_least("6.0", "6.0"));
        assert!(version_at_least("6.2.1", "6.0"));
        assert!(version_at_least("6.10", "6.9"));
        assert!(version_at_least("7", "6.0"));
        assert!(version_at_least("6.0.0-beta", "6.0"));
        assert!(!version_at_least("5.12.4", "6.0"));
        assert!(!version_at_least("", "6.0"));
    }

    #[test]
    fn test_progress_advance() {
        let order = ScopeKind::ORDER.to_vec();
        let mut progress = MigrationProgress::start(&order);
        assert_eq!(progress.scope, Some(ScopeKind::Post));

        let page = MigrationOutcome::empty(ScopeKind::Post, 40, false);
        progress.advance(&BatchNotice::from(&page), &order);
        assert_eq!(progress, MigrationProgress { scope: Some(ScopeKind::Post), cursor: 40 });

        let done = MigrationOutcome::exhausted(ScopeKind::Post, 40, false);
        progress.advance(&BatchNotice::from(&done), &order);
        assert_eq!(progress, MigrationProgress { scope: Some(ScopeKind::Term), cursor: 0 });

        let done = MigrationOutcome::exhausted(ScopeKind::Options, 0, false);
        progress.advance(&BatchNotice::from(&done), &order);
        assert!(progress.is_finished());
    }

    #[test]
    fn test_progress_skips_unconfigured_scopes() {
        let order = vec![ScopeKind::Post, ScopeKind::Options];
        let mut progress = MigrationProgress::start(&order);

        let done = MigrationOutcome::exhausted(ScopeKind::Post, 9, false);
        progress.advance(&BatchNotice::from(&done), &order);
        assert_eq!(progress.scope, Some(ScopeKind::Options));
    }
}
