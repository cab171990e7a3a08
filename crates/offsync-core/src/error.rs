//! Error types for offsync-core

use thiserror::Error;

/// Result type alias using offsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in offsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Network failure, timeout, or 5xx from the authority; safe to retry
    #[error("Transient error: {0}")]
    Transient(String),

    /// The authority holds a divergent version of the entity
    #[error("Sync conflict on {entity}: {message}")]
    Conflict { entity: String, message: String },

    /// The requested resolution cannot be applied to this conflict
    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    /// Unknown update, action, queue item, or conflict
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage corruption or authentication failure; never retried
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Operation not allowed in the record's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure should drive a backoff retry.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the failure must be surfaced immediately without retrying.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::LibSql(_) | Self::Database(_))
    }
}
