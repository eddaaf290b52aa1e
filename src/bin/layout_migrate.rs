//! CLI for migrating legacy hidden layout flags
//!
//! Usage:
//!   layout-migrate [OPTIONS] <COMMAND>
//!
//! Examples:
//!   # Migrate one page of entity meta, starting after row 1200
//!   layout-migrate --db site.db batch --scope post --cursor 1200
//!
//!   # Drain every scope, resuming where the last run stopped
//!   layout-migrate --db site.db run --resume-file .layout-migrate.json
//!
//!   # Preview without writing or deleting
//!   layout-migrate --db site.db --dry-run run
//!
//!   # How many hidden flags are left?
//!   layout-migrate --db site.db estimate
//!
//! Logs go to stderr (filter with RUST_LOG); results go to stdout as JSON.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hidden_layout_migrate::{
    BatchNotice, Config, JsonLinesSink, MigrateError, MigrationProgress, Migrator, ReportSink,
    ScopeAdapter, ScopeKind, Tee, WpStore,
};

#[derive(Parser, Debug)]
#[command(name = "layout-migrate")]
#[command(about = "Move legacy hidden layout flags into canonical layout meta")]
struct Args {
    /// Path to config file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// SQLite database holding the meta tables
    #[arg(long, global = true, env = "LAYOUT_MIGRATE_DB", value_name = "PATH")]
    db: Option<PathBuf>,

    /// Table name prefix
    #[arg(long, global = true)]
    table_prefix: Option<String>,

    /// Legacy rows scanned per batch
    #[arg(long, global = true)]
    page_size: Option<u32>,

    /// Report what would change without writing or deleting
    #[arg(long, global = true)]
    dry_run: bool,

    /// Skip re-reading canonical records before deleting legacy rows
    #[arg(long, global = true)]
    no_verify: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Migrate a single page of one scope
    Batch {
        /// post, term, user or options
        #[arg(long)]
        scope: ScopeKind,

        /// Last processed id (0 = start of scope)
        #[arg(long, default_value_t = 0)]
        cursor: u64,
    },

    /// Drain every configured scope
    Run {
        /// Progress file read on start and rewritten after every batch
        #[arg(long, value_name = "PATH")]
        resume_file: Option<PathBuf>,
    },

    /// Count hidden-valued legacy rows left in each scope
    Estimate,
}

/// Persists drive-loop progress after each batch
struct ResumeFileSink {
    path: PathBuf,
    progress: MigrationProgress,
    order: Vec<ScopeKind>,
}

impl ReportSink for ResumeFileSink {
    fn batch_completed(&mut self, notice: &BatchNotice<'_>) -> Result<(), MigrateError> {
        self.progress.advance(notice, &self.order);
        write_progress(&self.path, &self.progress)
    }
}

fn write_progress(path: &Path, progress: &MigrationProgress) -> Result<(), MigrateError> {
    fs::write(path, serde_json::to_string_pretty(progress)?)?;
    Ok(())
}

fn read_progress(path: &Path, order: &[ScopeKind]) -> Result<MigrationProgress> {
    if !path.exists() {
        return Ok(MigrationProgress::start(order));
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read resume file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid resume file {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("hidden_layout_migrate=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(db) = args.db {
        config.database_path = db;
    }
    if let Some(prefix) = args.table_prefix {
        config.table_prefix = prefix;
    }
    if let Some(page_size) = args.page_size {
        config.migration.page_size = page_size;
    }
    if args.dry_run {
        config.migration.dry_run = true;
    }
    if args.no_verify {
        config.migration.verify_before_delete = false;
    }
    config.validate()?;

    let store = WpStore::open(&config.database_path, &config.table_prefix)
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;

    info!(
        db = %config.database_path.display(),
        prefix = config.table_prefix.as_str(),
        page_size = config.migration.effective_page_size(),
        dry_run = config.migration.dry_run,
        "Starting layout-migrate"
    );

    let migrator = Migrator::new(config.migration.clone());

    match args.command {
        Command::Batch { scope, cursor } => {
            let outcome = migrator.run_batch(&store.scope(scope), cursor)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Command::Run { resume_file } => {
            let order = migrator.config().scope_order();
            let mut progress = match &resume_file {
                Some(path) => read_progress(path, &order)?,
                None => MigrationProgress::start(&order),
            };

            if progress.is_finished() {
                info!("Resume file says every scope is already exhausted");
                println!("0 migrated, 0 not migrated");
                return Ok(());
            }

            let scopes = store.scopes();
            let adapters: Vec<&dyn ScopeAdapter> =
                scopes.iter().map(|s| s as &dyn ScopeAdapter).collect();

            let result = match &resume_file {
                Some(path) => {
                    let mut sink = Tee(
                        JsonLinesSink::new(io::stdout()),
                        ResumeFileSink {
                            path: path.clone(),
                            progress,
                            order: order.clone(),
                        },
                    );
                    migrator.run_from(&mut progress, &adapters, &mut sink)
                }
                None => {
                    let mut sink = JsonLinesSink::new(io::stdout());
                    migrator.run_from(&mut progress, &adapters, &mut sink)
                }
            };
            let report = result?;

            println!("{}", report.summary());
            if !report.errors.is_empty() {
                warn!(
                    errors = report.errors.len(),
                    "Some groups failed; rerun to retry the rows left behind"
                );
            }
            if !progress.is_finished() {
                info!(
                    scope = ?progress.scope,
                    cursor = progress.cursor,
                    "Stopped before all scopes were exhausted"
                );
            }
            if !report.is_success() {
                std::process::exit(2);
            }
        }

        Command::Estimate => {
            let mut remaining = BTreeMap::new();
            for scope in migrator.config().scope_order() {
                remaining.insert(scope, migrator.estimate_remaining(&store.scope(scope), 0)?);
            }
            println!("{}", serde_json::to_string_pretty(&remaining)?);
        }
    }

    Ok(())
}
