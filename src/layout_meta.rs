//! Canonical layout meta records and the merge that absorbs legacy flags
//!
//! A canonical record holds the set of disabled layout positions for one
//! (destination, field) pair plus an opaque `renamed` mapping owned by the
//! surrounding system. Migration only ever unions positions into
//! `disabled`; it never removes one and never touches `renamed`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Structured per-field layout state
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LayoutMeta {
    /// Disabled layout positions, unique and ascending
    #[serde(default)]
    pub disabled: BTreeSet<u32>,
    /// Passthrough mapping, never interpreted here
    #[serde(default = "empty_renamed")]
    pub renamed: Value,
}

fn empty_renamed() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Default for LayoutMeta {
    fn default() -> Self {
        Self {
            disabled: BTreeSet::new(),
            renamed: empty_renamed(),
        }
    }
}

/// Result of merging newly discovered positions into existing state
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub merged: LayoutMeta,
    /// False iff `merged` equals the existing record attribute-wise
    pub changed: bool,
}

impl LayoutMeta {
    /// Create a record with the given disabled positions
    pub fn with_disabled<I: IntoIterator<Item = u32>>(positions: I) -> Self {
        Self {
            disabled: positions.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Decode a stored value
    ///
    /// `disabled` entries may be integers or numeric strings; anything else
    /// (negative numbers, floats, objects) makes the record undecodable so
    /// that it is never silently rewritten.
    pub fn from_stored(raw: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {}", e))?;
        let obj = match value {
            Value::Object(obj) => obj,
            // An empty serialized array is how an empty record round-trips
            Value::Array(ref items) if items.is_empty() => return Ok(Self::default()),
            other => return Err(format!("expected object, found {}", other)),
        };

        let mut disabled = BTreeSet::new();
        match obj.get("disabled") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for item in items {
                    disabled.insert(position_from_value(item)?);
                }
            }
            // Keyed arrays serialize as objects
            Some(Value::Object(items)) => {
                for item in items.values() {
                    disabled.insert(position_from_value(item)?);
                }
            }
            Some(other) => return Err(format!("disabled is not a list: {}", other)),
        }

        let renamed = obj.get("renamed").cloned().unwrap_or_else(empty_renamed);

        Ok(Self { disabled, renamed })
    }

    /// Decode a stored value, treating a blank value as no record
    ///
    /// An empty or whitespace-only meta value is how the site stores
    /// "nothing", so it is absent rather than corrupt.
    pub fn decode_stored(raw: &str) -> Result<Option<Self>, String> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        Self::from_stored(raw).map(Some)
    }

    /// Encode for storage
    pub fn to_stored(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Disabled positions as an ascending list
    pub fn disabled_sorted(&self) -> Vec<u32> {
        self.disabled.iter().copied().collect()
    }

    /// Whether every given position is already disabled
    pub fn covers(&self, positions: &BTreeSet<u32>) -> bool {
        positions.is_subset(&self.disabled)
    }
}

fn position_from_value(value: &Value) -> Result<u32, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| format!("invalid position: {}", n)),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s
            .parse()
            .map_err(|_| format!("invalid position: {:?}", s)),
        other => Err(format!("invalid position: {}", other)),
    }
}

/// Union new positions into an existing record
///
/// A missing record is treated as empty. `renamed` is carried through
/// unchanged.
pub fn merge(existing: Option<&LayoutMeta>, new_positions: &BTreeSet<u32>) -> MergeResult {
    let mut merged = existing.cloned().unwrap_or_default();
    merged.disabled.extend(new_positions.iter().copied());

    let changed = match existing {
        Some(existing) => merged != *existing,
        None => true,
    };

    MergeResult { merged, changed }
}
