//! Error types for the reconciliation engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the reconciliation engine.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more config validation failures, accumulated.
    #[error("invalid deployment config: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The named deployment has no stored config.
    #[error("deployment not found: {0}")]
    DeploymentMissing(String),

    /// Start/Stop was asked to act on a deployment with no containers.
    #[error("deployment {0} has 0 containers")]
    NoContainers(String),

    /// The job queue is at capacity.
    #[error("job queue is full")]
    QueueFull,

    /// New containers did not settle into a healthy state in time.
    #[error("container health unstable: {0}")]
    HealthUnstable(String),

    /// The job was aborted by shutdown.
    #[error("cancelled by shutdown")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] krane_store::StoreError),

    #[error("runtime error: {0}")]
    Runtime(#[from] krane_runtime::RuntimeError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    /// True for failures worth another attempt at the job level: transient
    /// store I/O and runtime transport errors. Semantic failures (bad image,
    /// unstable health, missing deployment) are surfaced as-is.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Store(e) => e.is_retriable(),
            Error::Runtime(e) => e.is_retriable(),
            _ => false,
        }
    }
}
