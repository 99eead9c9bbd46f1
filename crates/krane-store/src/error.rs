//! Error types for the Krane store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested collection or key does not exist.
    #[error("not found: {0}")]
    Missing(String),

    /// The operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any underlying database failure (open, transaction, read, write).
    #[error("storage error: {0}")]
    Io(String),
}

impl StoreError {
    /// Transient storage failures may be retried; missing/conflict may not.
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }
}
