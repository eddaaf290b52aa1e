//! Batch scanning of one scope's legacy rows
//!
//! The scanner pulls exactly one page from an adapter, remembers where the
//! page ended and drops rows whose value is not the hidden sentinel. Rows
//! that are not hidden are never migrated and never deleted; the cursor
//! still moves past them.

use tracing::debug;

use crate::error::MigrateError;
use crate::traits::{LegacyFlagRecord, ScopeAdapter};

/// One scanned page
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    /// Hidden-valued rows from the page, ascending by id
    pub records: Vec<LegacyFlagRecord>,
    /// Id of the last row in the page, or the input cursor if the page was empty
    pub cursor: u64,
    /// True iff the page was empty
    pub exhausted: bool,
    /// Rows in the page whose value was not the hidden sentinel
    pub not_hidden: usize,
}

/// Fetch the next page after `cursor`
pub fn next_batch<A: ScopeAdapter + ?Sized>(
    adapter: &A,
    cursor: u64,
    page_size: u32,
) -> Result<ScanPage, MigrateError> {
    let page = adapter.scan_page(cursor, page_size.max(1))?;

    let Some(last) = page.last() else {
        debug!(scope = %adapter.kind(), cursor, "Scope exhausted");
        return Ok(ScanPage {
            cursor,
            exhausted: true,
            ..Default::default()
        });
    };
    let new_cursor = last.id;
    let scanned = page.len();

    let records: Vec<LegacyFlagRecord> = page.into_iter().filter(|r| r.is_hidden()).collect();
    let not_hidden = scanned - records.len();

    debug!(
        scope = %adapter.kind(),
        from = cursor,
        to = new_cursor,
        scanned,
        hidden = records.len(),
        "Scanned page"
    );

    Ok(ScanPage {
        records,
        cursor: new_cursor,
        exhausted: false,
        not_hidden,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::WpStore;
    use crate::scope::ScopeKind;

    #[test]
    fn test_next_batch_moves_cursor_past_non_hidden_rows() {
        let store = WpStore::open_in_memory().unwrap();
        let hidden = store.add_meta(ScopeKind::Term, 4, "cta_0_acf_hide_layout", "1").unwrap();
        let visible = store.add_meta(ScopeKind::Term, 4, "cta_1_acf_hide_layout", "0").unwrap();

        let page = next_batch(&store.scope(ScopeKind::Term), 0, 10).unwrap();

        assert!(!page.exhausted);
        assert_eq!(page.cursor, visible);
        assert_eq!(page.not_hidden, 1);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].id, hidden);
    }

    #[test]
    fn test_next_batch_respects_page_size() {
        let store = WpStore::open_in_memory().unwrap();
        let first = store.add_meta(ScopeKind::Post, 1, "a_0_acf_hide_layout", "1").unwrap();
        store.add_meta(ScopeKind::Post, 1, "a_1_acf_hide_layout", "1").unwrap();

        let scope = store.scope(ScopeKind::Post);
        let page = next_batch(&scope, 0, 1).unwrap();
        assert_eq!(page.cursor, first);
        assert_eq!(page.records.len(), 1);

        // Zero is clamped to one
        let page = next_batch(&scope, 0, 0).unwrap();
        assert_eq!(page.records.len(), 1);
    }

    #[test]
    fn test_empty_page_keeps_cursor() {
        let store = WpStore::open_in_memory().unwrap();

        let page = next_batch(&store.scope(ScopeKind::User), 77, 50).unwrap();

        assert!(page.exhausted);
        assert_eq!(page.cursor, 77);
        assert!(page.records.is_empty());
    }
}
