//! # hidden-layout-migrate - Hidden Layout Flag Migration
//!
//! Flexible-content fields used to record "this layout row is hidden" as one
//! key/value row per hidden position (`{field}_{row}_acf_hide_layout = 1`).
//! Current storage keeps a single layout meta record per field instead:
//!
//! ```json
//! { "disabled": [1, 2, 5], "renamed": {} }
//! ```
//!
//! This crate moves the former into the latter, one bounded page at a time,
//! across the four storage scopes (entity meta, term meta, user meta,
//! global options). Legacy rows are deleted only once their positions are
//! reflected in the canonical record.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hidden_layout_migrate::{MigrationConfig, Migrator, ScopeAdapter, TracingSink, WpStore};
//!
//! let store = WpStore::open(Path::new("site.db"), "wp_")?;
//! let migrator = Migrator::new(MigrationConfig::default());
//!
//! let scopes = store.scopes();
//! let adapters: Vec<&dyn ScopeAdapter> = scopes.iter().map(|s| s as &dyn ScopeAdapter).collect();
//! let report = migrator.run(&adapters, &mut TracingSink)?;
//!
//! println!("{}", report.summary());
//! ```
//!
//! ## Module Organization
//!
//! - [`scope`] - The four storage scopes and their fixed order
//! - [`key_parser`] - Legacy key parsing (`hero_3_acf_hide_layout` -> `hero`, 3)
//! - [`layout_meta`] - Canonical record model and merge
//! - [`traits`] - [`ScopeAdapter`], the storage contract
//! - [`scanner`] - Cursor-based paging of legacy rows
//! - [`orchestrator`] - [`Migrator`]: one batch, or a full multi-scope run
//! - [`report`] - Per-batch outcomes and the cumulative report
//! - [`sink`] - Per-batch result reporting
//! - [`config`] - Migration and tool configuration
//! - [`db`] - SQLite-backed adapter

pub mod config;
pub mod db;
pub mod error;
pub mod key_parser;
pub mod layout_meta;
pub mod orchestrator;
pub mod report;
pub mod scanner;
pub mod scope;
pub mod sink;
pub mod traits;

// Re-export commonly used items
pub use config::{Config, MigrationConfig};
pub use db::{SqliteScope, WpStore};
pub use error::MigrateError;
pub use key_parser::{canonical_meta_key, parse_legacy_key, ParsedKey};
pub use layout_meta::{merge, LayoutMeta, MergeResult};
pub use orchestrator::{MigrationProgress, Migrator};
pub use report::{
    GroupLog, GroupStatus, MigrationError, MigrationOutcome, MigrationPhase, MigrationReport,
    ScopeCounts,
};
pub use scope::ScopeKind;
pub use sink::{BatchNotice, JsonLinesSink, MemorySink, RecordedBatch, ReportSink, Tee, TracingSink};
pub use traits::{LegacyFlagRecord, ScopeAdapter, WriteOutcome, HIDDEN_SENTINEL};
