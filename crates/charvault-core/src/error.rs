//! Error types for the character store

use thiserror::Error;

/// Main error type for character store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Local database is missing, unreadable, or has an incompatible schema.
    ///
    /// Fatal to initialization; the caller should offer a reset.
    #[error("Local storage could not be opened: {0}")]
    StorageOpen(String),

    /// A local write (put/delete) did not complete
    #[error("Local write failed: {0}")]
    Write(String),

    /// Any remote store failure
    #[error("Network error: {0}")]
    Network(String),

    /// A remote call exceeded its time budget
    #[error("Remote call timed out after {0} ms")]
    Timeout(u64),

    /// Malformed input rejected before any I/O
    #[error("Validation error: {0}")]
    Validation(String),

    /// Character was not found
    #[error("Character not found: {0}")]
    NotFound(String),

    /// Coordinator used before `initialize()` completed
    #[error("Store is not initialized")]
    NotInitialized,

    /// A sync pass is already running
    #[error("Sync already in progress")]
    SyncInProgress,

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Errors that must reach the caller instead of degrading to local-only.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::StorageOpen(_))
    }

    /// Errors raised by the remote side (absorbed into status counters).
    pub fn is_remote(&self) -> bool {
        matches!(self, StoreError::Network(_) | StoreError::Timeout(_))
    }

    pub(crate) fn open(err: impl std::fmt::Display) -> Self {
        StoreError::StorageOpen(err.to_string())
    }

    pub(crate) fn write(err: impl std::fmt::Display) -> Self {
        StoreError::Write(err.to_string())
    }

    pub(crate) fn network(err: impl std::fmt::Display) -> Self {
        StoreError::Network(err.to_string())
    }

    /// Reclassify a low-level database failure as a failed local write.
    pub(crate) fn into_write(self) -> Self {
        match self {
            StoreError::Database(e) => StoreError::write(e),
            StoreError::Transaction(e) => StoreError::write(e),
            StoreError::Table(e) => StoreError::write(e),
            StoreError::StorageOp(e) => StoreError::write(e),
            StoreError::Commit(e) => StoreError::write(e),
            StoreError::Io(e) => StoreError::write(e),
            other => other,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type alias using StoreError
pub type StoreResult<T> = Result<T, StoreError>;
