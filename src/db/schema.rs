//! Database schema definitions
//!
//! The tables mirror the shape of the site database the legacy flags live
//! in: three object meta tables and the global options table.

use rusqlite::Connection;
use tracing::info;

use crate::error::MigrateError;
use crate::scope::ScopeKind;

/// Physical layout of one scope's key/value table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDescriptor {
    /// Table name without prefix
    pub table: &'static str,
    pub id_column: &'static str,
    /// Owning object column (None for the options table)
    pub owner_column: Option<&'static str>,
    pub key_column: &'static str,
    pub value_column: &'static str,
}

impl TableDescriptor {
    pub fn for_scope(scope: ScopeKind) -> Self {
        match scope {
            ScopeKind::Post => Self {
                table: "postmeta",
                id_column: "meta_id",
                owner_column: Some("post_id"),
                key_column: "meta_key",
                value_column: "meta_value",
            },
            ScopeKind::Term => Self {
                table: "termmeta",
                id_column: "meta_id",
                owner_column: Some("term_id"),
                key_column: "meta_key",
                value_column: "meta_value",
            },
            ScopeKind::User => Self {
                table: "usermeta",
                id_column: "umeta_id",
                owner_column: Some("user_id"),
                key_column: "meta_key",
                value_column: "meta_value",
            },
            ScopeKind::Options => Self {
                table: "options",
                id_column: "option_id",
                owner_column: None,
                key_column: "option_name",
                value_column: "option_value",
            },
        }
    }

    /// Full table name with prefix
    pub fn table_name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.table)
    }
}

/// Initialize the database schema
pub fn init_schema(conn: &Connection, prefix: &str) -> Result<(), MigrateError> {
    for scope in ScopeKind::ORDER {
        let desc = TableDescriptor::for_scope(scope);
        let table = desc.table_name(prefix);
        conn.execute_batch(&table_sql(&desc, &table)).map_err(|e| {
            MigrateError::unavailable(scope, format!("Failed to create {}: {}", table, e))
        })?;
    }

    info!("Schema ready (prefix {:?})", prefix);
    Ok(())
}

/// Whether the table backing a scope exists
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
}

fn table_sql(desc: &TableDescriptor, table: &str) -> String {
    match desc.owner_column {
        Some(owner) => format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                {id} INTEGER PRIMARY KEY AUTOINCREMENT,
                {owner} INTEGER NOT NULL DEFAULT 0,
                {key} TEXT,
                {value} TEXT
            );
            CREATE INDEX IF NOT EXISTS {table}_{owner} ON {table}({owner});
            CREATE INDEX IF NOT EXISTS {table}_{key} ON {table}({key});
            "#,
            table = table,
            id = desc.id_column,
            owner = owner,
            key = desc.key_column,
            value = desc.value_column,
        ),
        None => format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                {id} INTEGER PRIMARY KEY AUTOINCREMENT,
                {key} TEXT NOT NULL UNIQUE,
                {value} TEXT NOT NULL,
                autoload TEXT NOT NULL DEFAULT 'yes'
            );
            "#,
            table = table,
            id = desc.id_column,
            key = desc.key_column,
            value = desc.value_column,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, "wp_").unwrap();

        for table in ["wp_postmeta", "wp_termmeta", "wp_usermeta", "wp_options"] {
            assert!(table_exists(&conn, table).unwrap(), "{} missing", table);
        }
        assert!(!table_exists(&conn, "wp_posts").unwrap());
    }

    #[test]
    fn test_init_schema_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, "site_").unwrap();
        init_schema(&conn, "site_").unwrap();

        assert!(table_exists(&conn, "site_usermeta").unwrap());
    }
}
