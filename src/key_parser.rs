//! Legacy flag key parsing
//!
//! Legacy hidden flags are stored one row per layout under keys of the form
//! `<field>_<position>_acf_hide_layout`. In the global scope the field name
//! additionally carries the `options_` prefix.

use serde::{Deserialize, Serialize};

use crate::scope::ScopeKind;

/// Sub-field id identifying the legacy hidden flag
pub const HIDE_LAYOUT_FIELD: &str = "acf_hide_layout";

/// Separator between key segments
pub const SEPARATOR: char = '_';

/// Suffix every legacy flag key ends with (`_acf_hide_layout`)
pub fn legacy_suffix() -> String {
    format!("{}{}", SEPARATOR, HIDE_LAYOUT_FIELD)
}

/// Storage key of the canonical layout meta record for a field
pub fn canonical_meta_key(field_name: &str) -> String {
    format!("_{}_layout_meta", field_name)
}

/// Structured meaning extracted from a legacy key
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    /// Parent flexible-content field name
    pub field_name: String,
    /// Zero-based layout row index
    pub position: u32,
}

/// Parse a legacy key, returning `None` for anything that is not a legacy flag
pub fn parse_legacy_key(raw_key: &str, scope: ScopeKind) -> Option<ParsedKey> {
    let stem = raw_key.strip_suffix(legacy_suffix().as_str())?;
    let (field, position) = stem.rsplit_once(SEPARATOR)?;

    // Digits only: u32::from_str would also accept a leading '+'
    if position.is_empty() || !position.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let position: u32 = position.parse().ok()?;

    let field = match scope.field_prefix() {
        Some(prefix) => field.strip_prefix(prefix)?,
        None => field,
    };
    if field.is_empty() {
        return None;
    }

    Some(ParsedKey {
        field_name: field.to_string(),
        position,
    })
}
