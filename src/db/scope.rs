//! Scope adapter over one of the store's meta tables

use rusqlite::{params, Connection};
use tracing::{debug, warn};

use super::schema::TableDescriptor;
use super::{WpStore, VERSION_OPTION};
use crate::error::MigrateError;
use crate::key_parser::{canonical_meta_key, legacy_suffix};
use crate::layout_meta::LayoutMeta;
use crate::scope::ScopeKind;
use crate::traits::{LegacyFlagRecord, ScopeAdapter, WriteOutcome, HIDDEN_SENTINEL};

/// Max bound parameters per DELETE statement
const DELETE_CHUNK: usize = 500;

/// One scope of a [`WpStore`]
///
/// All four scopes share this implementation; they differ only in the
/// [`TableDescriptor`] and in how canonical keys are named.
pub struct SqliteScope<'a> {
    store: &'a WpStore,
    kind: ScopeKind,
    desc: TableDescriptor,
    table: String,
}

impl<'a> SqliteScope<'a> {
    pub fn new(store: &'a WpStore, kind: ScopeKind) -> Self {
        let desc = TableDescriptor::for_scope(kind);
        let table = desc.table_name(store.prefix());
        Self {
            store,
            kind,
            desc,
            table,
        }
    }

    /// Stored key of the canonical record for a field in this scope
    ///
    /// Options-page fields are stored under `options_` + the canonical key.
    pub fn canonical_key(&self, field: &str) -> String {
        let key = canonical_meta_key(field);
        match self.kind.field_prefix() {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key,
        }
    }

    fn like_pattern() -> String {
        let escaped = legacy_suffix().replace('\\', "\\\\").replace('_', "\\_").replace('%', "\\%");
        format!("%{}", escaped)
    }

    fn unavailable(&self, what: &str, e: impl std::fmt::Display) -> MigrateError {
        MigrateError::unavailable(self.kind, format!("{} on {}: {}", what, self.table, e))
    }

    fn write_failed(&self, owner: u64, field: &str, message: String) -> MigrateError {
        MigrateError::WriteFailed {
            destination: self.destination(owner),
            field: field.to_string(),
            message,
        }
    }

    /// `WHERE` clause and owner parameter selecting (owner, key) rows
    fn owner_filter(&self, owner: u64) -> (String, Option<i64>) {
        match self.desc.owner_column {
            Some(col) => (
                format!("{} = ? AND {} = ?", col, self.desc.key_column),
                Some(owner as i64),
            ),
            None => (format!("{} = ?", self.desc.key_column), None),
        }
    }

    fn stored_values(
        &self,
        conn: &Connection,
        owner: u64,
        key: &str,
    ) -> Result<Vec<Option<String>>, rusqlite::Error> {
        let (filter, owner_param) = self.owner_filter(owner);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}",
            self.desc.value_column, self.table, filter, self.desc.id_column
        );
        let mut param_refs: Vec<&dyn rusqlite::ToSql> = vec![];
        if let Some(owner) = owner_param.as_ref() {
            param_refs.push(owner);
        }
        param_refs.push(&key);

        let mut stmt = conn.prepare(&sql)?;
        let values = stmt
            .query_map(param_refs.as_slice(), |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }
}

/// Cursor as a SQLite integer, or None when it lies beyond every row id
fn sql_cursor(after_id: u64) -> Option<i64> {
    i64::try_from(after_id).ok()
}

impl ScopeAdapter for SqliteScope<'_> {
    fn kind(&self) -> ScopeKind {
        self.kind
    }

    fn layout_meta_version(&self) -> Result<Option<String>, MigrateError> {
        self.store.get_option(VERSION_OPTION)
    }

    fn scan_page(
        &self,
        after_id: u64,
        page_size: u32,
    ) -> Result<Vec<LegacyFlagRecord>, MigrateError> {
        // Row ids never exceed i64::MAX, so nothing lies past such a cursor
        let Some(after_id) = sql_cursor(after_id) else {
            return Ok(Vec::new());
        };
        let owner_expr = self.desc.owner_column.unwrap_or("0");
        let sql = format!(
            "SELECT {id}, {owner}, {key}, {value} FROM {table} \
             WHERE {id} > ? AND {key} LIKE ? ESCAPE '\\' \
             ORDER BY {id} ASC LIMIT ?",
            id = self.desc.id_column,
            owner = owner_expr,
            key = self.desc.key_column,
            value = self.desc.value_column,
            table = self.table,
        );

        self.store.with_conn(self.kind, |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| self.unavailable("Prepare failed", e))?;

            let records = stmt
                .query_map(
                    params![after_id, Self::like_pattern(), page_size as i64],
                    |row| {
                        Ok(LegacyFlagRecord {
                            id: row.get::<_, i64>(0)? as u64,
                            owner: row.get::<_, i64>(1)? as u64,
                            key: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                            value: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        })
                    },
                )
                .map_err(|e| self.unavailable("Scan failed", e))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| self.unavailable("Row parse failed", e))?;

            debug!(scope = %self.kind, after_id, rows = records.len(), "Fetched legacy rows");
            Ok(records)
        })
    }

    fn read_canonical(&self, owner: u64, field: &str) -> Result<Option<LayoutMeta>, MigrateError> {
        let key = self.canonical_key(field);

        let values = self.store.with_conn(self.kind, |conn| {
            self.stored_values(conn, owner, &key)
                .map_err(|e| self.unavailable("Read failed", e))
        })?;

        // Duplicate meta rows are allowed; the first one is authoritative
        let Some(raw) = values.into_iter().flatten().next() else {
            return Ok(None);
        };

        LayoutMeta::decode_stored(&raw).map_err(|message| MigrateError::CorruptCanonical {
            destination: self.destination(owner),
            field: field.to_string(),
            message,
        })
    }

    fn write_canonical(
        &self,
        owner: u64,
        field: &str,
        meta: &LayoutMeta,
    ) -> Result<WriteOutcome, MigrateError> {
        let key = self.canonical_key(field);
        let stored = meta
            .to_stored()
            .map_err(|e| self.write_failed(owner, field, format!("Encode failed: {}", e)))?;

        self.store.with_conn(self.kind, |conn| {
            let tx = conn.transaction().map_err(|e| {
                self.write_failed(owner, field, format!("Transaction failed: {}", e))
            })?;

            let existing = self
                .stored_values(&tx, owner, &key)
                .map_err(|e| self.write_failed(owner, field, format!("Read failed: {}", e)))?;

            let already_stored = existing.iter().all(|v| v.as_deref() == Some(stored.as_str()));
            if !existing.is_empty() && already_stored {
                return Ok(WriteOutcome::Unchanged);
            }

            let changes = if existing.is_empty() {
                match self.desc.owner_column {
                    Some(col) => tx.execute(
                        &format!(
                            "INSERT INTO {} ({}, {}, {}) VALUES (?, ?, ?)",
                            self.table, col, self.desc.key_column, self.desc.value_column
                        ),
                        params![owner as i64, key, stored],
                    ),
                    None => tx.execute(
                        &format!(
                            "INSERT INTO {} ({}, {}, autoload) VALUES (?, ?, 'no')",
                            self.table, self.desc.key_column, self.desc.value_column
                        ),
                        params![key, stored],
                    ),
                }
            } else {
                let (filter, owner_param) = self.owner_filter(owner);
                let sql = format!(
                    "UPDATE {} SET {} = ? WHERE {}",
                    self.table, self.desc.value_column, filter
                );
                match owner_param {
                    Some(owner) => tx.execute(&sql, params![stored, owner, key]),
                    None => tx.execute(&sql, params![stored, key]),
                }
            }
            .map_err(|e| self.write_failed(owner, field, format!("Write failed: {}", e)))?;

            if changes == 0 {
                warn!(scope = %self.kind, owner, field, "Canonical write affected no rows");
                return Err(self.write_failed(owner, field, "no rows affected".to_string()));
            }

            tx.commit()
                .map_err(|e| self.write_failed(owner, field, format!("Commit failed: {}", e)))?;

            Ok(WriteOutcome::Written)
        })
    }

    fn delete_by_ids(&self, ids: &[u64]) -> Result<usize, MigrateError> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.store.with_conn(self.kind, |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| self.unavailable("Transaction failed", e))?;

            let mut deleted = 0;
            for chunk in ids.chunks(DELETE_CHUNK) {
                let placeholders: Vec<_> = chunk.iter().map(|_| "?").collect();
                let sql = format!(
                    "DELETE FROM {} WHERE {} IN ({})",
                    self.table,
                    self.desc.id_column,
                    placeholders.join(", ")
                );
                let params: Vec<i64> = chunk.iter().map(|id| *id as i64).collect();
                deleted += tx
                    .execute(&sql, rusqlite::params_from_iter(params))
                    .map_err(|e| self.unavailable("Delete failed", e))?;
            }

            tx.commit().map_err(|e| self.unavailable("Commit failed", e))?;
            Ok(deleted)
        })
    }

    fn count_candidates(&self, after_id: u64) -> Result<u64, MigrateError> {
        let Some(after_id) = sql_cursor(after_id) else {
            return Ok(0);
        };
        let sql = format!(
            "SELECT COUNT(*) FROM {table} \
             WHERE {id} > ? AND {key} LIKE ? ESCAPE '\\' AND {value} = ?",
            table = self.table,
            id = self.desc.id_column,
            key = self.desc.key_column,
            value = self.desc.value_column,
        );

        self.store.with_conn(self.kind, |conn| {
            conn.query_row(
                &sql,
                params![after_id, Self::like_pattern(), HIDDEN_SENTINEL],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
            .map_err(|e| self.unavailable("Count failed", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> WpStore {
        WpStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_scan_page_filters_and_orders() {
        let store = store();
        let a = store.add_meta(ScopeKind::Post, 1, "hero_0_acf_hide_layout", "1").unwrap();
        store.add_meta(ScopeKind::Post, 1, "_thumbnail_id", "55").unwrap();
        let b = store.add_meta(ScopeKind::Post, 2, "hero_2_acf_hide_layout", "0").unwrap();
        let c = store.add_meta(ScopeKind::Post, 2, "hero_1_acf_hide_layout", "1").unwrap();

        let scope = store.scope(ScopeKind::Post);
        let page = scope.scan_page(0, 10).unwrap();
        let ids: Vec<u64> = page.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a, b, c]);

        let page = scope.scan_page(a, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, b);
        assert_eq!(page[0].owner, 2);

        assert!(scope.scan_page(c, 10).unwrap().is_empty());
    }

    #[test]
    fn test_like_pattern_escapes_underscores() {
        let store = store();
        // '_' would match any character if left unescaped
        store.add_meta(ScopeKind::Post, 1, "hero_0Xacf_hide_layout", "1").unwrap();

        assert!(store.scope(ScopeKind::Post).scan_page(0, 10).unwrap().is_empty());
    }

    #[test]
    fn test_options_scope_has_sentinel_owner() {
        let store = store();
        store.set_option("options_footer_0_acf_hide_layout", "1").unwrap();

        let scope = store.scope(ScopeKind::Options);
        let page = scope.scan_page(0, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].owner, 0);
        assert_eq!(scope.destination(page[0].owner), "options");
        assert_eq!(scope.canonical_key("footer"), "options__footer_layout_meta");
    }

    #[test]
    fn test_write_then_read_canonical() {
        let store = store();
        let scope = store.scope(ScopeKind::Term);
        let meta = LayoutMeta::with_disabled([4, 1]);

        assert_eq!(scope.read_canonical(9, "hero").unwrap(), None);
        assert_eq!(scope.write_canonical(9, "hero", &meta).unwrap(), WriteOutcome::Written);
        assert_eq!(scope.write_canonical(9, "hero", &meta).unwrap(), WriteOutcome::Unchanged);
        assert_eq!(scope.read_canonical(9, "hero").unwrap(), Some(meta.clone()));

        let raw = store.get_meta(ScopeKind::Term, 9, "_hero_layout_meta").unwrap();
        assert_eq!(raw, vec![r#"{"disabled":[1,4],"renamed":{}}"#.to_string()]);

        let updated = LayoutMeta::with_disabled([1, 4, 6]);
        assert_eq!(scope.write_canonical(9, "hero", &updated).unwrap(), WriteOutcome::Written);
        assert_eq!(scope.read_canonical(9, "hero").unwrap(), Some(updated));
        assert_eq!(store.get_meta(ScopeKind::Term, 9, "_hero_layout_meta").unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_canonical_is_reported() {
        let store = store();
        store.add_meta(ScopeKind::User, 3, "_nav_layout_meta", "a:1:{garbage").unwrap();

        let err = store.scope(ScopeKind::User).read_canonical(3, "nav").unwrap_err();
        match err {
            MigrateError::CorruptCanonical { destination, field, .. } => {
                assert_eq!(destination, "user_3");
                assert_eq!(field, "nav");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_delete_by_ids_is_repeatable() {
        let store = store();
        let a = store.add_meta(ScopeKind::Post, 1, "hero_0_acf_hide_layout", "1").unwrap();
        let b = store.add_meta(ScopeKind::Post, 1, "hero_1_acf_hide_layout", "1").unwrap();
        let scope = store.scope(ScopeKind::Post);

        assert_eq!(scope.delete_by_ids(&[a, b]).unwrap(), 2);
        assert_eq!(scope.delete_by_ids(&[a, b]).unwrap(), 0);
        assert_eq!(scope.delete_by_ids(&[]).unwrap(), 0);
    }

    #[test]
    fn test_count_candidates() {
        let store = store();
        let a = store.add_meta(ScopeKind::Post, 1, "hero_0_acf_hide_layout", "1").unwrap();
        store.add_meta(ScopeKind::Post, 1, "hero_1_acf_hide_layout", "0").unwrap();
        store.add_meta(ScopeKind::Post, 1, "hero_2_acf_hide_layout", "1").unwrap();

        let scope = store.scope(ScopeKind::Post);
        assert_eq!(scope.count_candidates(0).unwrap(), 2);
        assert_eq!(scope.count_candidates(a).unwrap(), 1);
    }

    #[test]
    fn test_cursor_beyond_row_ids_finds_nothing() {
        let store = store();
        store.add_meta(ScopeKind::Post, 1, "hero_0_acf_hide_layout", "1").unwrap();

        let scope = store.scope(ScopeKind::Post);
        let past_rowids = i64::MAX as u64 + 1;
        assert!(scope.scan_page(past_rowids, 10).unwrap().is_empty());
        assert!(scope.scan_page(u64::MAX, 10).unwrap().is_empty());
        assert_eq!(scope.count_candidates(u64::MAX).unwrap(), 0);
        assert_eq!(scope.scan_page(i64::MAX as u64, 10).unwrap().len(), 0);
    }

    #[test]
    fn test_blank_canonical_reads_as_absent() {
        let store = store();
        store.add_meta(ScopeKind::Post, 2, "_hero_layout_meta", "").unwrap();
        let scope = store.scope(ScopeKind::Post);

        assert_eq!(scope.read_canonical(2, "hero").unwrap(), None);

        let meta = LayoutMeta::with_disabled([1]);
        assert_eq!(scope.write_canonical(2, "hero", &meta).unwrap(), WriteOutcome::Written);
        assert_eq!(scope.read_canonical(2, "hero").unwrap(), Some(meta));
        assert_eq!(store.count_rows(ScopeKind::Post).unwrap(), 1);
    }

    #[test]
    fn test_missing_table_is_scope_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = WpStore::open(&dir.path().join("empty.db"), "wp_").unwrap();

        let err = store.scope(ScopeKind::Post).scan_page(0, 10).unwrap_err();
        assert!(matches!(err, MigrateError::ScopeUnavailable { scope: ScopeKind::Post, .. }));
    }
}
