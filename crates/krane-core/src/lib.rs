//! krane-core — the deployment reconciliation engine.
//!
//! Turns declarative deployment configs into runtime state through an
//! asynchronous, persisted job queue:
//!
//! - [`DeploymentConfig`] — validated declarative spec, stored per name
//! - [`KraneContainer`] — deployment-scoped view of runtime containers,
//!   with the health predicate used after rollouts
//! - [`Job`] — one unit of reconciler work, with setup/run/finalize phases,
//!   retry policy, and a persisted phase log
//! - [`JobQueue`] / [`WorkerPool`] — bounded FIFO with per-deployment
//!   mutual exclusion
//! - [`Reconciler`] — composes jobs for the five deployment actions
//!   (run, delete, start, stop, restart)

pub mod config;
pub mod container;
mod error;
pub mod job;
pub mod labels;
pub mod queue;
pub mod reconciler;
pub mod secrets;
mod worker;

pub use config::DeploymentConfig;
pub use container::KraneContainer;
pub use error::{Error, Result};
pub use job::{Job, JobArgs, JobKind, JobState, Phase, PhaseOutcome};
pub use queue::JobQueue;
pub use reconciler::Reconciler;
pub use worker::{JobExecutor, WorkerPool};

/// Name of the shared bridge network all managed containers attach to.
pub const KRANE_NETWORK: &str = "krane";

/// Label identifying which deployment owns a container.
pub const DEPLOYMENT_LABEL: &str = "deployment.name";

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
