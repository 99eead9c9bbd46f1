//! Runtime error types.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors surfaced by the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The engine could not be reached (transport failure, timeout).
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    /// The named container, image, or network does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation conflicts with current engine state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The image reference could not be resolved or pulled.
    #[error("image error: {0}")]
    Image(String),

    /// Any other engine-side failure.
    #[error("runtime error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Transport failures may be retried; semantic failures may not.
    pub fn is_retriable(&self) -> bool {
        matches!(self, RuntimeError::Unavailable(_))
    }
}
