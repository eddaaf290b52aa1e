//! Storage scopes that can hold legacy hidden-layout flags
//!
//! Four partitions exist, each a key/value meta table attached to a
//! different kind of object. They are always migrated in the same order:
//! post meta, term meta, user meta, then the global options table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed literal prefix carried by options-page field names in the global scope
pub const OPTIONS_PREFIX: &str = "options_";

/// Sentinel object reference for the global scope
pub const OPTIONS_OBJECT_REF: &str = "options";

/// One of the four storage partitions
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    /// Entity-attached records (post meta)
    Post,
    /// Taxonomy-term-attached records (term meta)
    Term,
    /// Account-attached records (user meta)
    User,
    /// Global singleton records (options table)
    Options,
}

impl ScopeKind {
    /// All scopes in migration order
    pub const ORDER: [ScopeKind; 4] = [Self::Post, Self::Term, Self::User, Self::Options];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Term => "term",
            Self::User => "user",
            Self::Options => "options",
        }
    }

    /// The scope that follows this one, if any
    pub fn next(&self) -> Option<ScopeKind> {
        let pos = Self::ORDER.iter().position(|s| s == self)?;
        Self::ORDER.get(pos + 1).copied()
    }

    /// Whether records in this scope belong to an owning object
    pub fn has_owner(&self) -> bool {
        !matches!(self, Self::Options)
    }

    /// Prefix the legacy key and canonical option name carry in this scope
    pub fn field_prefix(&self) -> Option<&'static str> {
        match self {
            Self::Options => Some(OPTIONS_PREFIX),
            _ => None,
        }
    }

    /// Render an owner id as the object reference the field API uses
    ///
    /// Posts are bare ids, terms and users are type-qualified, and the
    /// global scope is always the `options` sentinel.
    pub fn object_ref(&self, owner: u64) -> String {
        match self {
            Self::Post => owner.to_string(),
            Self::Term => format!("term_{}", owner),
            Self::User => format!("user_{}", owner),
            Self::Options => OPTIONS_OBJECT_REF.to_string(),
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScopeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "post" | "posts" | "postmeta" => Ok(Self::Post),
            "term" | "terms" | "termmeta" => Ok(Self::Term),
            "user" | "users" | "usermeta" => Ok(Self::User),
            "options" | "option" => Ok(Self::Options),
            other => Err(format!("unknown scope: {}", other)),
        }
    }
}
