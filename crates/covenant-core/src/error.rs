//! Error types for the memory substrate.
//!
//! Mirrors the error-kind taxonomy the server uses to decide whether a
//! failure is surfaced verbatim, retried by the caller, or folded into a
//! partial result: validation errors are never retried, transient
//! infrastructure errors carry enough detail for the caller to retry, and
//! fatal errors are logged and propagated unchanged.

use thiserror::Error;

/// Core substrate result type.
pub type Result<T> = std::result::Result<T, CoreError>;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO failure opening the storage directory or persisting an index.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A memory, version, entity, or edge id did not resolve to a row.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied arguments failed validation (never retried, never logged as an error).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A self-link, duplicate edge, or other graph invariant was violated.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// The embedding backend is unavailable or cold; callers may retry.
    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The vector index rejected an operation (dimension mismatch, corrupt persisted index).
    #[error("vector index error: {0}")]
    VectorIndex(String),

    /// Schema version on disk is newer than this build understands.
    #[error("schema version {on_disk} is newer than supported version {supported}")]
    SchemaTooNew { on_disk: u32, supported: u32 },

    /// Store initialization failed (bad storage path, permissions, etc).
    #[error("storage initialization error: {0}")]
    Init(String),
}

impl CoreError {
    /// True for errors a caller may reasonably retry (busy engine, cold encoder).
    pub fn is_transient(&self) -> bool {
        match self {
            CoreError::EmbeddingUnavailable(_) => true,
            CoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::DatabaseBusy
            }
            _ => false,
        }
    }
}
