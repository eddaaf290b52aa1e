//! Traits defining the storage contract the migration runs against
//!
//! Each storage scope is exposed through one [`ScopeAdapter`]. The engine
//! never sees tables, columns or object-reference formats; it only pages
//! through legacy rows, reads and writes canonical records by
//! `(owner, field)`, and bulk-deletes absorbed rows.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = WpStore::open_in_memory()?;
//! let posts = SqliteScope::new(&store, ScopeKind::Post);
//!
//! let page = posts.scan_page(0, 100)?;
//! for record in &page {
//!     println!("{} {} = {}", record.id, record.key, record.value);
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::MigrateError;
use crate::layout_meta::LayoutMeta;
use crate::scope::ScopeKind;

/// Raw value that marks a layout as hidden
pub const HIDDEN_SENTINEL: &str = "1";

/// One legacy flag row
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LegacyFlagRecord {
    /// Scope-local row identifier, monotonically increasing
    pub id: u64,
    /// Owning object id (always 0 in the global scope)
    pub owner: u64,
    pub key: String,
    pub value: String,
}

impl LegacyFlagRecord {
    pub fn is_hidden(&self) -> bool {
        self.value == HIDDEN_SENTINEL
    }
}

/// What a canonical write actually did
///
/// Failures are reported through `Err`, so "nothing to write" and
/// "write did not persist" can never be confused.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The stored value was replaced or created
    Written,
    /// The stored value already matched; storage was not touched
    Unchanged,
}

/// Uniform access to one storage scope
pub trait ScopeAdapter {
    /// Which scope this adapter serves
    fn kind(&self) -> ScopeKind;

    /// Version of the canonical layout-meta provider, if one is installed
    ///
    /// The orchestrator refuses to run when this is `None` or too old, so
    /// legacy rows are never deleted with nowhere to put them.
    fn layout_meta_version(&self) -> Result<Option<String>, MigrateError>;

    /// Legacy-looking rows with `id > after_id`, ascending, at most `page_size`
    ///
    /// An empty page means the scope is exhausted.
    fn scan_page(
        &self,
        after_id: u64,
        page_size: u32,
    ) -> Result<Vec<LegacyFlagRecord>, MigrateError>;

    /// Read the canonical record for a field on an owner
    fn read_canonical(&self, owner: u64, field: &str) -> Result<Option<LayoutMeta>, MigrateError>;

    /// Persist the canonical record for a field on an owner
    ///
    /// Must be idempotent: writing the value already stored returns
    /// `Ok(WriteOutcome::Unchanged)`.
    fn write_canonical(
        &self,
        owner: u64,
        field: &str,
        meta: &LayoutMeta,
    ) -> Result<WriteOutcome, MigrateError>;

    /// Delete legacy rows by id, returning how many rows were removed
    fn delete_by_ids(&self, ids: &[u64]) -> Result<usize, MigrateError>;

    /// Number of hidden-valued legacy-looking rows after the cursor
    fn count_candidates(&self, after_id: u64) -> Result<u64, MigrateError>;

    /// Human-readable destination reference for an owner
    fn destination(&self, owner: u64) -> String {
        self.kind().object_ref(owner)
    }
}

impl<A: ScopeAdapter + ?Sized> ScopeAdapter for &A {
    fn kind(&self) -> ScopeKind {
        (**self).kind()
    }

    fn layout_meta_version(&self) -> Result<Option<String>, MigrateError> {
        (**self).layout_meta_version()
    }

    fn scan_page(
        &self,
        after_id: u64,
        page_size: u32,
    ) -> Result<Vec<LegacyFlagRecord>, MigrateError> {
        (**self).scan_page(after_id, page_size)
    }

    fn read_canonical(&self, owner: u64, field: &str) -> Result<Option<LayoutMeta>, MigrateError> {
        (**self).read_canonical(owner, field)
    }

    fn write_canonical(
        &self,
        owner: u64,
        field: &str,
        meta: &LayoutMeta,
    ) -> Result<WriteOutcome, MigrateError> {
        (**self).write_canonical(owner, field, meta)
    }

    fn delete_by_ids(&self, ids: &[u64]) -> Result<usize, MigrateError> {
        (**self).delete_by_ids(ids)
    }

    fn count_candidates(&self, after_id: u64) -> Result<u64, MigrateError> {
        (**self).count_candidates(after_id)
    }

    fn destination(&self, owner: u64) -> String {
        (**self).destination(owner)
    }
}
