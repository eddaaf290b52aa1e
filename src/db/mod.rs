//! SQLite-backed site storage
//!
//! Legacy hidden flags and canonical layout meta both live in the site's
//! key/value meta tables. [`WpStore`] owns the connection; [`SqliteScope`]
//! exposes one scope of it through the [`ScopeAdapter`](crate::ScopeAdapter)
//! contract.
//!
//! ## Tables
//!
//! - `<prefix>postmeta` - Entity-attached meta (`meta_id`, `post_id`)
//! - `<prefix>termmeta` - Taxonomy-term meta (`meta_id`, `term_id`)
//! - `<prefix>usermeta` - Account meta (`umeta_id`, `user_id`)
//! - `<prefix>options` - Global options (`option_id`, unique `option_name`)

pub mod schema;
pub mod scope;

pub use scope::SqliteScope;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::config::validate_table_prefix;
use crate::error::MigrateError;
use crate::scope::ScopeKind;
use schema::TableDescriptor;

/// Option holding the installed field-plugin version
pub const VERSION_OPTION: &str = "acf_version";

/// SQLite database holding the meta tables
pub struct WpStore {
    conn: Mutex<Connection>,
    prefix: String,
}

impl WpStore {
    /// Open an existing database without touching its schema
    pub fn open(path: &Path, prefix: &str) -> Result<Self, MigrateError> {
        validate_table_prefix(prefix)?;
        info!("Opening SQLite database at {:?}", path);

        let conn = Connection::open(path)
            .map_err(|e| MigrateError::Config(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| MigrateError::Config(format!("Failed to set PRAGMA: {}", e)))?;

        for scope in ScopeKind::ORDER {
            let table = TableDescriptor::for_scope(scope).table_name(prefix);
            let exists = schema::table_exists(&conn, &table)
                .map_err(|e| MigrateError::unavailable(scope, format!("Query failed: {}", e)))?;
            if !exists {
                warn!(
                    scope = %scope,
                    table = table.as_str(),
                    "Table missing, scope will be unavailable"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            prefix: prefix.to_string(),
        })
    }

    /// Open a database and create any missing tables
    pub fn create(path: &Path, prefix: &str) -> Result<Self, MigrateError> {
        let store = Self::open(path, prefix)?;
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory database with the default `wp_` prefix (for testing)
    pub fn open_in_memory() -> Result<Self, MigrateError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory().map_err(|e| {
            MigrateError::Config(format!("Failed to open in-memory SQLite: {}", e))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            prefix: "wp_".to_string(),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Create the four meta tables if they do not exist
    pub fn init_schema(&self) -> Result<(), MigrateError> {
        self.with_conn(ScopeKind::Post, |conn| schema::init_schema(conn, &self.prefix))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Adapter for one scope of this store
    pub fn scope(&self, kind: ScopeKind) -> SqliteScope<'_> {
        SqliteScope::new(self, kind)
    }

    /// Adapters for all four scopes, in migration order
    pub fn scopes(&self) -> Vec<SqliteScope<'_>> {
        ScopeKind::ORDER.iter().map(|k| self.scope(*k)).collect()
    }

    /// Run a closure with the connection, attributing lock failures to `scope`
    pub fn with_conn<F, T>(&self, scope: ScopeKind, f: F) -> Result<T, MigrateError>
    where
        F: FnOnce(&mut Connection) -> Result<T, MigrateError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| MigrateError::unavailable(scope, format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Add a meta row (or upsert an option) and return its id
    pub fn add_meta(
        &self,
        scope: ScopeKind,
        owner: u64,
        key: &str,
        value: &str,
    ) -> Result<u64, MigrateError> {
        let desc = TableDescriptor::for_scope(scope);
        let table = desc.table_name(&self.prefix);

        self.with_conn(scope, |conn| {
            let id = match desc.owner_column {
                Some(owner_col) => {
                    let sql = format!(
                        "INSERT INTO {} ({}, {}, {}) VALUES (?, ?, ?)",
                        table, owner_col, desc.key_column, desc.value_column
                    );
                    conn.execute(&sql, params![owner as i64, key, value]).map_err(|e| {
                        MigrateError::unavailable(scope, format!("Insert failed: {}", e))
                    })?;
                    conn.last_insert_rowid()
                }
                None => {
                    let sql = format!(
                        "INSERT INTO {t} ({k}, {v}) VALUES (?, ?) \
                         ON CONFLICT({k}) DO UPDATE SET {v} = excluded.{v}",
                        t = table,
                        k = desc.key_column,
                        v = desc.value_column
                    );
                    conn.execute(&sql, params![key, value]).map_err(|e| {
                        MigrateError::unavailable(scope, format!("Upsert failed: {}", e))
                    })?;

                    let sql = format!(
                        "SELECT {} FROM {} WHERE {} = ?",
                        desc.id_column, table, desc.key_column
                    );
                    conn.query_row(&sql, params![key], |row| row.get(0)).map_err(|e| {
                        MigrateError::unavailable(scope, format!("Query failed: {}", e))
                    })?
                }
            };
            Ok(id as u64)
        })
    }

    /// Read a raw option value
    pub fn get_option(&self, name: &str) -> Result<Option<String>, MigrateError> {
        let desc = TableDescriptor::for_scope(ScopeKind::Options);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            desc.value_column,
            desc.table_name(&self.prefix),
            desc.key_column
        );

        self.with_conn(ScopeKind::Options, |conn| {
            conn.query_row(&sql, params![name], |row| row.get(0))
                .optional()
                .map_err(|e| {
                    MigrateError::unavailable(ScopeKind::Options, format!("Query failed: {}", e))
                })
        })
    }

    /// Set a raw option value
    pub fn set_option(&self, name: &str, value: &str) -> Result<(), MigrateError> {
        self.add_meta(ScopeKind::Options, 0, name, value).map(|_| ())
    }

    /// Raw non-NULL meta values for an owner and key, in id order
    pub fn get_meta(
        &self,
        scope: ScopeKind,
        owner: u64,
        key: &str,
    ) -> Result<Vec<String>, MigrateError> {
        let desc = TableDescriptor::for_scope(scope);
        let table = desc.table_name(&self.prefix);
        let owner_param = owner as i64;
        let mut param_refs: Vec<&dyn rusqlite::ToSql> = vec![];
        let sql = match desc.owner_column {
            Some(owner_col) => {
                param_refs.push(&owner_param);
                format!(
                    "SELECT {} FROM {} WHERE {} = ? AND {} = ? ORDER BY {}",
                    desc.value_column, table, owner_col, desc.key_column, desc.id_column
                )
            }
            None => format!(
                "SELECT {} FROM {} WHERE {} = ?",
                desc.value_column, table, desc.key_column
            ),
        };
        param_refs.push(&key);

        self.with_conn(scope, |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| MigrateError::unavailable(scope, format!("Prepare failed: {}", e)))?;

            let values: Vec<Option<String>> = stmt
                .query_map(param_refs.as_slice(), |row| row.get(0))
                .map_err(|e| MigrateError::unavailable(scope, format!("Query failed: {}", e)))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| MigrateError::unavailable(scope, format!("Row parse failed: {}", e)))?;

            // NULL values carry nothing to decode
            Ok(values.into_iter().flatten().collect())
        })
    }

    /// Number of rows in a scope's table
    pub fn count_rows(&self, scope: ScopeKind) -> Result<u64, MigrateError> {
        let desc = TableDescriptor::for_scope(scope);
        let sql = format!("SELECT COUNT(*) FROM {}", desc.table_name(&self.prefix));

        self.with_conn(scope, |conn| {
            conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(|e| MigrateError::unavailable(scope, format!("Query failed: {}", e)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get_meta() {
        let store = WpStore::open_in_memory().unwrap();

        let first = store.add_meta(ScopeKind::Post, 5, "hero_0_acf_hide_layout", "1").unwrap();
        let second = store.add_meta(ScopeKind::Post, 5, "hero_1_acf_hide_layout", "0").unwrap();
        assert!(second > first);

        let values = store.get_meta(ScopeKind::Post, 5, "hero_1_acf_hide_layout").unwrap();
        assert_eq!(values, vec!["0".to_string()]);
        assert!(store.get_meta(ScopeKind::Post, 6, "hero_1_acf_hide_layout").unwrap().is_empty());
        assert_eq!(store.count_rows(ScopeKind::Post).unwrap(), 2);
    }

    #[test]
    fn test_options_upsert() {
        let store = WpStore::open_in_memory().unwrap();

        store.set_option(VERSION_OPTION, "5.12").unwrap();
        store.set_option(VERSION_OPTION, "6.2.1").unwrap();

        assert_eq!(store.get_option(VERSION_OPTION).unwrap().as_deref(), Some("6.2.1"));
        assert_eq!(store.count_rows(ScopeKind::Options).unwrap(), 1);
        assert_eq!(store.get_option("missing").unwrap(), None);
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.db");

        {
            let store = WpStore::create(&path, "site_").unwrap();
            store.add_meta(ScopeKind::User, 3, "nav_2_acf_hide_layout", "1").unwrap();
        }

        let store = WpStore::open(&path, "site_").unwrap();
        assert_eq!(store.prefix(), "site_");
        assert_eq!(store.count_rows(ScopeKind::User).unwrap(), 1);
    }

    #[test]
    fn test_rejects_unsafe_prefix() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WpStore::open(&dir.path().join("x.db"), "wp_; --").is_err());
    }
}
