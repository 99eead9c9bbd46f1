//! Jobs — persisted units of asynchronous reconciler work.
//!
//! Each deployment action becomes one [`Job`] whose [`JobArgs`] snapshot
//! everything the phases need (the config, the containers to retire). Job
//! records live in the deployment's `jobs:<name>` collection and are kept
//! for audit; trimming is left to the operator.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use krane_store::Store;

use crate::config::DeploymentConfig;
use crate::container::KraneContainer;
use crate::epoch_secs;
use crate::error::Result;

/// Name of a deployment's job-history collection.
pub fn collection(deployment: &str) -> String {
    format!("jobs:{deployment}")
}

/// The five deployment actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Run,
    Delete,
    Start,
    Stop,
    Restart,
}

impl JobKind {
    /// Whether the finalize phase runs, given how the run phase ended.
    /// Rollouts clean up the old generation only on success; delete always
    /// attempts its teardown; start/stop have nothing to finalize.
    pub fn runs_finalize_on(&self, run_ok: bool) -> bool {
        match self {
            JobKind::Run | JobKind::Restart => run_ok,
            JobKind::Delete => true,
            JobKind::Start | JobKind::Stop => false,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::Run => "run",
            JobKind::Delete => "delete",
            JobKind::Start => "start",
            JobKind::Stop => "stop",
            JobKind::Restart => "restart",
        };
        write!(f, "{name}")
    }
}

/// Action-specific payload, tagged for forward compatibility.
///
/// Rollout payloads (`Run`, `Restart`) carry a value snapshot of the config
/// taken at enqueue time; the containers to retire are captured during the
/// setup phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum JobArgs {
    Run {
        config: DeploymentConfig,
        #[serde(default)]
        containers_to_remove: Vec<KraneContainer>,
    },
    Delete {
        deployment: String,
    },
    Start {
        deployment: String,
    },
    Stop {
        deployment: String,
    },
    Restart {
        config: DeploymentConfig,
        #[serde(default)]
        containers_to_remove: Vec<KraneContainer>,
    },
}

impl JobArgs {
    pub fn kind(&self) -> JobKind {
        match self {
            JobArgs::Run { .. } => JobKind::Run,
            JobArgs::Delete { .. } => JobKind::Delete,
            JobArgs::Start { .. } => JobKind::Start,
            JobArgs::Stop { .. } => JobKind::Stop,
            JobArgs::Restart { .. } => JobKind::Restart,
        }
    }

    pub fn deployment(&self) -> &str {
        match self {
            JobArgs::Run { config, .. } | JobArgs::Restart { config, .. } => &config.name,
            JobArgs::Delete { deployment }
            | JobArgs::Start { deployment }
            | JobArgs::Stop { deployment } => deployment,
        }
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Execution phases of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Run,
    Finalize,
}

/// Outcome of one phase execution, kept in the job record for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub ok: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// One asynchronous unit of reconciler work for one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub deployment: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub state: JobState,
    /// Maximum run attempts, including the first.
    pub retry_policy: u32,
    /// Run invocations so far.
    pub attempts: u32,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    /// Last failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub phase_log: Vec<PhaseOutcome>,
    pub args: JobArgs,
}

impl Job {
    /// Create a queued job for the given payload.
    pub fn new(args: JobArgs, retry_policy: u32) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            deployment: args.deployment().to_string(),
            kind: args.kind(),
            state: JobState::Queued,
            retry_policy,
            attempts: 0,
            started_at: None,
            finished_at: None,
            error: None,
            phase_log: Vec::new(),
            args,
        }
    }

    /// Append a phase outcome to the log.
    pub(crate) fn record_phase<T>(
        &mut self,
        phase: Phase,
        started: Instant,
        result: &Result<T>,
    ) {
        self.phase_log.push(PhaseOutcome {
            phase,
            ok: result.is_ok(),
            duration_ms: started.elapsed().as_millis() as u64,
            err: result.as_ref().err().map(|e| e.to_string()),
        });
    }

    /// Move to a terminal state, recording the failure if any.
    pub(crate) fn finish(&mut self, error: Option<String>) {
        self.state = if error.is_none() {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        self.error = error.or(self.error.take());
        self.finished_at = Some(epoch_secs());
    }
}

// ── Persistence and read API ───────────────────────────────────────

/// Write a job record into its deployment's job collection.
pub fn save(store: &dyn Store, job: &Job) -> Result<()> {
    let bytes = serde_json::to_vec(job)?;
    store.put(&collection(&job.deployment), &job.id, &bytes)?;
    Ok(())
}

/// One job by deployment and ID.
pub fn by_id(store: &dyn Store, deployment: &str, id: &str) -> Result<Job> {
    let bytes = store.get(&collection(deployment), id)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// All jobs recorded for a deployment, most recently started first.
pub fn by_deployment(store: &dyn Store, deployment: &str) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for (_, bytes) in store.list(&collection(deployment))? {
        jobs.push(serde_json::from_slice::<Job>(&bytes)?);
    }
    jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(jobs)
}

/// The most recently started jobs across all deployments.
pub fn recent(store: &dyn Store, limit: usize) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for config in DeploymentConfig::list(store)? {
        if store.has_collection(&collection(&config.name))? {
            jobs.extend(by_deployment(store, &config.name)?);
        }
    }
    jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    jobs.truncate(limit);
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use krane_store::DiskStore;

    fn run_args(name: &str) -> JobArgs {
        JobArgs::Run {
            config: DeploymentConfig {
                name: name.to_string(),
                image: "nginx".to_string(),
                ..Default::default()
            },
            containers_to_remove: Vec::new(),
        }
    }

    #[test]
    fn new_job_is_queued() {
        let job = Job::new(run_args("web"), 3);
        assert_eq!(job.deployment, "web");
        assert_eq!(job.kind, JobKind::Run);
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.retry_policy, 3);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.id.len(), 32);
    }

    #[test]
    fn finalize_policy_per_kind() {
        assert!(JobKind::Run.runs_finalize_on(true));
        assert!(!JobKind::Run.runs_finalize_on(false));
        assert!(JobKind::Restart.runs_finalize_on(true));
        assert!(!JobKind::Restart.runs_finalize_on(false));
        assert!(JobKind::Delete.runs_finalize_on(true));
        assert!(JobKind::Delete.runs_finalize_on(false));
        assert!(!JobKind::Start.runs_finalize_on(true));
        assert!(!JobKind::Stop.runs_finalize_on(true));
    }

    #[test]
    fn finish_keeps_an_earlier_recorded_error() {
        let mut job = Job::new(run_args("web"), 1);
        job.error = Some("finalize: boom".to_string());
        job.finish(None);
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.error.as_deref(), Some("finalize: boom"));

        let mut job = Job::new(run_args("web"), 1);
        job.finish(Some("pull failed".to_string()));
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("pull failed"));
    }

    #[test]
    fn args_round_trip_with_tag() {
        let job = Job::new(run_args("web"), 1);
        let bytes = serde_json::to_vec(&job).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "run");
        assert_eq!(json["args"]["action"], "run");

        let back: Job = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn save_and_read_back() {
        let store = DiskStore::open_in_memory().unwrap();
        store.create_collection(&collection("web")).unwrap();

        let mut job = Job::new(run_args("web"), 1);
        job.started_at = Some(100);
        save(&store, &job).unwrap();

        let loaded = by_id(&store, "web", &job.id).unwrap();
        assert_eq!(loaded, job);
    }

    #[test]
    fn by_deployment_sorts_recent_first() {
        let store = DiskStore::open_in_memory().unwrap();
        store.create_collection(&collection("web")).unwrap();

        for started in [100, 300, 200] {
            let mut job = Job::new(run_args("web"), 1);
            job.started_at = Some(started);
            save(&store, &job).unwrap();
        }

        let jobs = by_deployment(&store, "web").unwrap();
        let starts: Vec<u64> = jobs.iter().filter_map(|j| j.started_at).collect();
        assert_eq!(starts, vec![300, 200, 100]);
    }

    #[test]
    fn recent_spans_deployments_and_truncates() {
        let store = DiskStore::open_in_memory().unwrap();
        for (name, started) in [("api", 100), ("web", 300), ("api", 200)] {
            DeploymentConfig {
                name: name.to_string(),
                image: "nginx".to_string(),
                ..Default::default()
            }
            .save(&store)
            .unwrap();
            store.create_collection(&collection(name)).unwrap();
            let mut job = Job::new(run_args(name), 1);
            job.started_at = Some(started);
            save(&store, &job).unwrap();
        }

        let jobs = recent(&store, 2).unwrap();
        let starts: Vec<u64> = jobs.iter().filter_map(|j| j.started_at).collect();
        assert_eq!(starts, vec![300, 200]);
    }
}
