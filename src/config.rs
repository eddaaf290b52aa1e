//! Migration configuration types
//!
//! [`MigrationConfig`] holds the engine knobs (page size, dry run,
//! verification, which scopes to drive). [`Config`] is the on-disk TOML
//! file used by the `layout-migrate` binary and wraps a `MigrationConfig`
//! together with database location settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::MigrateError;
use crate::scope::ScopeKind;

/// Engine configuration
///
/// # Example
///
/// ```rust,ignore
/// let config = MigrationConfig {
///     page_size: 250,
///     ..MigrationConfig::dry_run()
/// };
/// let migrator = Migrator::new(config);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    /// Legacy rows scanned per batch
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Report what would change without writing or deleting anything
    #[serde(default)]
    pub dry_run: bool,

    /// Re-read canonical records before deleting the rows they absorbed
    #[serde(default = "default_true")]
    pub verify_before_delete: bool,

    /// Oldest layout-meta provider version the migration will write to
    #[serde(default = "default_min_version")]
    pub min_layout_meta_version: String,

    /// Scopes to drive, in order (empty = all four in the fixed order)
    #[serde(default)]
    pub scopes: Vec<ScopeKind>,

    /// Maximum batches per drive loop (None = run until exhausted)
    #[serde(default)]
    pub max_batches: Option<u32>,
}

fn default_page_size() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_min_version() -> String {
    "6.0".to_string()
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            dry_run: false,
            verify_before_delete: true,
            min_layout_meta_version: default_min_version(),
            scopes: Vec::new(),
            max_batches: None,
        }
    }
}

impl MigrationConfig {
    /// Preview configuration: no writes, no deletes
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Default::default()
        }
    }

    /// Only drive the given scopes
    pub fn for_scopes(scopes: Vec<ScopeKind>) -> Self {
        Self {
            scopes,
            ..Default::default()
        }
    }

    /// Page size actually used (never zero)
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.max(1)
    }

    /// Configured scopes in migration order
    ///
    /// Duplicates are dropped and the fixed post → term → user → options
    /// order is always kept, whatever order the config lists them in.
    pub fn scope_order(&self) -> Vec<ScopeKind> {
        ScopeKind::ORDER
            .iter()
            .copied()
            .filter(|s| self.scopes.is_empty() || self.scopes.contains(s))
            .collect()
    }

    /// Check if a specific scope should be migrated
    pub fn should_migrate(&self, scope: ScopeKind) -> bool {
        self.scopes.is_empty() || self.scopes.contains(&scope)
    }
}

/// Configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database holding the meta tables
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Table name prefix (`wp_` → `wp_postmeta`, `wp_options`, ...)
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,

    /// Engine settings
    #[serde(default)]
    pub migration: MigrationConfig,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("site.db")
}

fn default_table_prefix() -> String {
    "wp_".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            table_prefix: default_table_prefix(),
            migration: MigrationConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MigrateError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| MigrateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), MigrateError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| MigrateError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that cannot be used safely
    pub fn validate(&self) -> Result<(), MigrateError> {
        validate_table_prefix(&self.table_prefix)?;
        if self.migration.min_layout_meta_version.trim().is_empty() {
            return Err(MigrateError::Config(
                "min_layout_meta_version must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Table prefixes are spliced into SQL, so only `[A-Za-z0-9_]` is allowed
pub fn validate_table_prefix(prefix: &str) -> Result<(), MigrateError> {
    if prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(MigrateError::Config(format!(
            "invalid table prefix {:?}: only letters, digits and '_' are allowed",
            prefix
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_order_keeps_fixed_order() {
        let config = MigrationConfig::for_scopes(vec![ScopeKind::Options, ScopeKind::Post]);
        assert_eq!(config.scope_order(), vec![ScopeKind::Post, ScopeKind::Options]);

        let config = MigrationConfig::default();
        assert_eq!(config.scope_order(), ScopeKind::ORDER.to_vec());
    }

    #[test]
    fn test_should_migrate() {
        let config = MigrationConfig::default();
        assert!(config.should_migrate(ScopeKind::User)); // Empty = all

        let config = MigrationConfig::for_scopes(vec![ScopeKind::Term]);
        assert!(config.should_migrate(ScopeKind::Term));
        assert!(!config.should_migrate(ScopeKind::User));
    }

    #[test]
    fn test_effective_page_size_never_zero() {
        let config = MigrationConfig {
            page_size: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_page_size(), 1);
    }

    #[test]
    fn test_config_toml_defaults() {
        let config: Config = toml::from_str(
            r#"
            database_path = "/var/lib/site.db"

            [migration]
            dry_run = true
            scopes = ["post", "options"]
            "#,
        )
        .unwrap();

        assert_eq!(config.table_prefix, "wp_");
        assert_eq!(config.migration.page_size, 100);
        assert!(config.migration.dry_run);
        assert!(config.migration.verify_before_delete);
        assert_eq!(config.migration.scopes, vec![ScopeKind::Post, ScopeKind::Options]);
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.toml");

        let mut config = Config::default();
        config.table_prefix = "site2_".to_string();
        config.migration.page_size = 25;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.table_prefix, "site2_");
        assert_eq!(loaded.migration, config.migration);
    }

    #[test]
    fn test_invalid_table_prefix() {
        assert!(validate_table_prefix("wp_").is_ok());
        assert!(validate_table_prefix("").is_ok());
        assert!(validate_table_prefix("wp; DROP TABLE").is_err());
    }
}
