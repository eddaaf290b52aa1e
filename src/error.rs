//! Error types for hidden-layout-migrate

use thiserror::Error;

use crate::scope::ScopeKind;

#[derive(Error, Debug)]
pub enum MigrateError {
    /// Storage for a scope cannot be read or written at all
    #[error("Scope {scope} unavailable: {message}")]
    ScopeUnavailable { scope: ScopeKind, message: String },

    /// A capability the migration depends on is missing
    #[error("Precondition unmet: {0}")]
    PreconditionUnmet(String),

    /// Canonical write did not persist
    #[error("Write failed for {field} on {destination}: {message}")]
    WriteFailed {
        destination: String,
        field: String,
        message: String,
    },

    /// Existing canonical record could not be decoded and must not be overwritten
    #[error("Corrupt layout meta for {field} on {destination}: {message}")]
    CorruptCanonical {
        destination: String,
        field: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    pub(crate) fn unavailable(scope: ScopeKind, message: impl Into<String>) -> Self {
        Self::ScopeUnavailable {
            scope,
            message: message.into(),
        }
    }
}
