//! Deployment-scoped view of runtime containers.
//!
//! [`KraneContainer`] projects the runtime's inspect payload into the few
//! attributes the engine cares about, and carries the lifecycle operations
//! (create, start, stop, remove) plus the health predicate used to gate a
//! rollout.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use krane_runtime::{ContainerInspect, ContainerSpec, ContainerState, HealthState, PortBinding,
    Runtime};
use krane_store::Store;

use crate::config::DeploymentConfig;
use crate::error::{Error, Result};
use crate::{epoch_secs, labels, secrets, DEPLOYMENT_LABEL, KRANE_NETWORK};

/// Seconds a container gets to stop gracefully before the engine kills it.
pub const STOP_TIMEOUT_SECS: u32 = 60;

/// Probes per container in the post-rollout health check.
pub const HEALTH_CHECK_RETRIES: u32 = 10;

/// Seconds a container without a health command must stay running before
/// it counts as healthy.
const SETTLE_SECS: u64 = 2;

/// How long `start` polls for the container to reach a stable state.
const START_WAIT: Duration = Duration::from_secs(30);
const START_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One container owned by a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KraneContainer {
    pub id: String,
    pub deployment: String,
    pub name: String,
    pub state: ContainerState,
    pub ports: Vec<PortBinding>,
    pub created_at: u64,
}

impl KraneContainer {
    /// Project a runtime inspect result into the deployment-scoped view.
    pub fn from_inspect(inspect: ContainerInspect) -> Self {
        Self {
            deployment: inspect
                .labels
                .get(DEPLOYMENT_LABEL)
                .cloned()
                .unwrap_or_default(),
            id: inspect.id,
            name: inspect.name,
            state: inspect.state,
            ports: inspect.ports,
            created_at: inspect.created_at,
        }
    }

    /// Create (but do not start) one container for this config.
    ///
    /// Secret references in the config's env are resolved here; a dangling
    /// reference aborts creation.
    pub async fn create(
        runtime: &dyn Runtime,
        store: &dyn Store,
        config: &DeploymentConfig,
    ) -> Result<Self> {
        let env = secrets::resolve_env(store, config)?;
        let spec = ContainerSpec {
            name: format!("{}-{}", config.name, short_id()),
            hostname: config.name.clone(),
            image: config.image_reference(),
            env,
            labels: labels::container_labels(config),
            ports: config.ports.clone(),
            network: KRANE_NETWORK.to_string(),
        };
        let id = runtime.create_container(&spec).await?;
        debug!(deployment = %config.name, container = %spec.name, "container created");
        Ok(Self {
            id,
            deployment: config.name.clone(),
            name: spec.name,
            state: ContainerState::Created,
            ports: spec.ports,
            created_at: epoch_secs(),
        })
    }

    /// Start the container and wait until it reaches `running` or a
    /// terminal state, bounded by a timeout. The health check is the
    /// authority on whether the deployment is actually usable.
    pub async fn start(&self, runtime: &dyn Runtime) -> Result<()> {
        runtime.start_container(&self.id).await?;
        let deadline = Instant::now() + START_WAIT;
        loop {
            let inspect = runtime.inspect_container(&self.id).await?;
            if inspect.state == ContainerState::Running || inspect.state.is_terminal() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(container = %self.name, state = ?inspect.state, "start wait timed out");
                return Ok(());
            }
            tokio::time::sleep(START_POLL_INTERVAL).await;
        }
    }

    /// Stop the container, killing it after the grace period.
    pub async fn stop(&self, runtime: &dyn Runtime) -> Result<()> {
        runtime.stop_container(&self.id, STOP_TIMEOUT_SECS).await?;
        Ok(())
    }

    /// Stop, then remove the container without force.
    pub async fn remove(&self, runtime: &dyn Runtime) -> Result<()> {
        runtime.stop_container(&self.id, STOP_TIMEOUT_SECS).await?;
        runtime.remove_container(&self.id, false).await?;
        Ok(())
    }

    /// One health probe. `Ok(true)` means healthy, `Ok(false)` means not
    /// yet; a container that can no longer become healthy (exited, dead)
    /// is a hard failure.
    pub async fn ok(&self, runtime: &dyn Runtime, last_restart_count: &mut u32) -> Result<bool> {
        let inspect = runtime.inspect_container(&self.id).await?;
        readiness(&inspect, last_restart_count, epoch_secs())
    }
}

/// The health predicate over one inspect snapshot.
///
/// Healthy iff the container is running, its restart count has not grown
/// since the previous probe, and either the engine reports `healthy` or no
/// health command is configured and the container has been running for the
/// settle window.
fn readiness(inspect: &ContainerInspect, last_restart_count: &mut u32, now: u64) -> Result<bool> {
    if inspect.state.is_terminal() {
        return Err(Error::HealthUnstable(format!(
            "container {} is {:?} (exit code {})",
            inspect.name,
            inspect.state,
            inspect.exit_code.unwrap_or_default()
        )));
    }
    if inspect.state != ContainerState::Running {
        return Ok(false);
    }
    if inspect.restart_count > *last_restart_count {
        *last_restart_count = inspect.restart_count;
        return Ok(false);
    }
    match inspect.health {
        Some(HealthState::Healthy) => Ok(true),
        Some(_) => Ok(false),
        None => {
            let running_for = inspect
                .started_at
                .map(|started| now.saturating_sub(started))
                .unwrap_or(0);
            Ok(running_for >= SETTLE_SECS)
        }
    }
}

/// Probe every container until healthy, with a linear backoff: the sleep
/// before attempt `i` is `10·i` seconds (attempt 0 probes immediately).
/// Containers are probed in sequence, each against its own budget.
pub async fn retriable_health_check(
    runtime: &dyn Runtime,
    containers: &[KraneContainer],
    retries: u32,
) -> Result<()> {
    for container in containers {
        let mut last_restart_count = 0;
        let mut healthy = false;
        for attempt in 0..=retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(10 * u64::from(attempt))).await;
            }
            if container.ok(runtime, &mut last_restart_count).await? {
                healthy = true;
                break;
            }
            debug!(container = %container.name, attempt, "not healthy yet");
        }
        if !healthy {
            return Err(Error::HealthUnstable(format!(
                "container {} did not become healthy within {} probes",
                container.name,
                retries + 1
            )));
        }
    }
    Ok(())
}

/// All containers currently labelled as belonging to a deployment.
pub async fn by_deployment(runtime: &dyn Runtime, name: &str) -> Result<Vec<KraneContainer>> {
    let selector = format!("{DEPLOYMENT_LABEL}={name}");
    let inspects = runtime.list_containers(&selector).await?;
    Ok(inspects.into_iter().map(KraneContainer::from_inspect).collect())
}

/// Short unique suffix for container names.
fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use krane_runtime::FakeRuntime;
    use krane_store::DiskStore;

    fn inspect(state: ContainerState) -> ContainerInspect {
        ContainerInspect {
            id: "ctr-1".to_string(),
            name: "web-1".to_string(),
            image: "nginx:1.25".to_string(),
            state,
            exit_code: None,
            restart_count: 0,
            health: None,
            started_at: Some(100),
            created_at: 90,
            labels: HashMap::from([(DEPLOYMENT_LABEL.to_string(), "web".to_string())]),
            ports: vec![],
        }
    }

    fn config(name: &str) -> DeploymentConfig {
        let mut config = DeploymentConfig {
            name: name.to_string(),
            image: "nginx".to_string(),
            ..Default::default()
        };
        config.apply_defaults();
        config
    }

    // ── readiness ──────────────────────────────────────────────────

    #[test]
    fn running_and_healthy_passes() {
        let mut snapshot = inspect(ContainerState::Running);
        snapshot.health = Some(HealthState::Healthy);
        let mut restarts = 0;
        assert!(readiness(&snapshot, &mut restarts, 101).unwrap());
    }

    #[test]
    fn engine_health_overrides_settle_window() {
        let mut snapshot = inspect(ContainerState::Running);
        snapshot.health = Some(HealthState::Starting);
        let mut restarts = 0;
        // Even well past the settle window, a configured health command
        // that has not reported healthy keeps the container not-ready.
        assert!(!readiness(&snapshot, &mut restarts, 500).unwrap());
    }

    #[test]
    fn settle_window_applies_without_health_command() {
        let snapshot = inspect(ContainerState::Running);
        let mut restarts = 0;
        assert!(!readiness(&snapshot, &mut restarts, 101).unwrap());
        assert!(readiness(&snapshot, &mut restarts, 102).unwrap());
    }

    #[test]
    fn exited_container_is_a_hard_failure() {
        let mut snapshot = inspect(ContainerState::Exited);
        snapshot.exit_code = Some(137);
        let mut restarts = 0;
        let err = readiness(&snapshot, &mut restarts, 200).unwrap_err();
        assert!(matches!(err, Error::HealthUnstable(_)));
        assert!(err.to_string().contains("137"));
    }

    #[test]
    fn restart_growth_defers_readiness() {
        let mut snapshot = inspect(ContainerState::Running);
        snapshot.health = Some(HealthState::Healthy);
        snapshot.restart_count = 2;
        let mut restarts = 0;

        // First probe observes the growth and resets the baseline.
        assert!(!readiness(&snapshot, &mut restarts, 200).unwrap());
        assert_eq!(restarts, 2);
        // A stable count passes on the next probe.
        assert!(readiness(&snapshot, &mut restarts, 200).unwrap());
    }

    #[test]
    fn created_container_is_not_yet_ready() {
        let snapshot = inspect(ContainerState::Created);
        let mut restarts = 0;
        assert!(!readiness(&snapshot, &mut restarts, 500).unwrap());
    }

    // ── lifecycle against the fake runtime ─────────────────────────

    #[tokio::test]
    async fn create_resolves_secret_references() {
        let runtime = FakeRuntime::new();
        let store = DiskStore::open_in_memory().unwrap();
        secrets::create_collection(&store, "web").unwrap();
        secrets::put(&store, "web", "token", "s3cret").unwrap();

        let mut cfg = config("web");
        cfg.env.insert("API_TOKEN".to_string(), "@token".to_string());
        cfg.secrets.insert("token".to_string());

        let container = KraneContainer::create(&runtime, &store, &cfg).await.unwrap();
        assert_eq!(container.deployment, "web");
        assert!(container.name.starts_with("web-"));
        assert_eq!(container.state, ContainerState::Created);

        let listed = runtime.list_containers("deployment.name=web").await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn create_aborts_on_dangling_secret() {
        let runtime = FakeRuntime::new();
        let store = DiskStore::open_in_memory().unwrap();
        secrets::create_collection(&store, "web").unwrap();

        let mut cfg = config("web");
        cfg.env.insert("API_TOKEN".to_string(), "@token".to_string());
        cfg.secrets.insert("token".to_string());

        assert!(KraneContainer::create(&runtime, &store, &cfg).await.is_err());
        assert_eq!(runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn start_then_health_check_passes() {
        let runtime = FakeRuntime::new();
        let store = DiskStore::open_in_memory().unwrap();
        let cfg = config("web");

        let container = KraneContainer::create(&runtime, &store, &cfg).await.unwrap();
        container.start(&runtime).await.unwrap();

        retriable_health_check(&runtime, std::slice::from_ref(&container), 0)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn health_check_names_the_offender() {
        let runtime = FakeRuntime::new();
        runtime.exit_on_start(true);
        let store = DiskStore::open_in_memory().unwrap();
        let cfg = config("web");

        let container = KraneContainer::create(&runtime, &store, &cfg).await.unwrap();
        container.start(&runtime).await.unwrap();

        let err = retriable_health_check(&runtime, std::slice::from_ref(&container), 3)
            .await
            .unwrap_err();
        match err {
            Error::HealthUnstable(msg) => assert!(msg.contains(&container.name)),
            other => panic!("expected HealthUnstable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn remove_stops_first() {
        let runtime = FakeRuntime::new();
        let store = DiskStore::open_in_memory().unwrap();
        let cfg = config("web");

        let container = KraneContainer::create(&runtime, &store, &cfg).await.unwrap();
        container.start(&runtime).await.unwrap();
        container.remove(&runtime).await.unwrap();

        assert_eq!(runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn by_deployment_projects_labels() {
        let runtime = FakeRuntime::new();
        let store = DiskStore::open_in_memory().unwrap();
        KraneContainer::create(&runtime, &store, &config("web")).await.unwrap();
        KraneContainer::create(&runtime, &store, &config("api")).await.unwrap();

        let web = by_deployment(&runtime, "web").await.unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].deployment, "web");
    }
}
