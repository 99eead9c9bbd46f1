//! In-memory runtime implementation (for testing).
//!
//! Behaves like a tiny container engine: containers move through
//! created → running → exited, list/inspect reflect current state, and a
//! few knobs simulate the interesting failure modes (unknown image,
//! container that dies on startup).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{image_reference, Runtime};
use crate::types::{ContainerInspect, ContainerSpec, ContainerState, HealthState};

#[derive(Debug)]
struct FakeContainer {
    spec: ContainerSpec,
    state: ContainerState,
    exit_code: Option<i64>,
    restart_count: u32,
    started_at: Option<u64>,
    created_at: u64,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    networks: HashMap<String, String>,
    unknown_images: HashSet<String>,
    pulled: Vec<String>,
    exit_on_start: bool,
    next_id: u64,
}

/// An in-memory [`Runtime`] with no external dependencies.
#[derive(Default)]
pub struct FakeRuntime {
    inner: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make pulls of the given reference fail with an image error.
    pub fn mark_image_unknown(&self, reference: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.unknown_images.insert(reference.to_string());
    }

    /// Make every started container exit immediately (simulates a crash
    /// on startup).
    pub fn exit_on_start(&self, enabled: bool) {
        self.inner.lock().unwrap().exit_on_start = enabled;
    }

    /// Image references pulled so far, in order.
    pub fn pulled_images(&self) -> Vec<String> {
        self.inner.lock().unwrap().pulled.clone()
    }

    /// Number of containers currently known to the engine, in any state.
    pub fn container_count(&self) -> usize {
        self.inner.lock().unwrap().containers.len()
    }

    fn project(id: &str, container: &FakeContainer) -> ContainerInspect {
        ContainerInspect {
            id: id.to_string(),
            name: container.spec.name.clone(),
            image: container.spec.image.clone(),
            state: container.state,
            exit_code: container.exit_code,
            restart_count: container.restart_count,
            // A running fake container reports engine health; dead ones
            // report nothing, like a container without a health command.
            health: (container.state == ContainerState::Running).then_some(HealthState::Healthy),
            started_at: container.started_at,
            created_at: container.created_at,
            labels: container.spec.labels.clone(),
            ports: container.spec.ports.clone(),
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn ensure_network(&self, name: &str) -> RuntimeResult<String> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner
            .networks
            .entry(name.to_string())
            .or_insert_with(|| format!("net-{name}"))
            .clone();
        Ok(id)
    }

    async fn pull_image(
        &self,
        registry: Option<&str>,
        image: &str,
        tag: &str,
    ) -> RuntimeResult<()> {
        let reference = image_reference(registry, image, tag);
        let mut inner = self.inner.lock().unwrap();
        if inner.unknown_images.contains(&reference) {
            return Err(RuntimeError::Image(format!(
                "manifest for {reference} not found"
            )));
        }
        inner.pulled.push(reference);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.containers.values().any(|c| c.spec.name == spec.name) {
            return Err(RuntimeError::Conflict(format!(
                "container name {} already in use",
                spec.name
            )));
        }
        inner.next_id += 1;
        let id = format!("ctr-{}", inner.next_id);
        inner.containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                state: ContainerState::Created,
                exit_code: None,
                restart_count: 0,
                started_at: None,
                created_at: epoch_secs(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let exit_on_start = inner.exit_on_start;
        let container = inner
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
        if exit_on_start {
            container.state = ContainerState::Exited;
            container.exit_code = Some(1);
        } else {
            container.state = ContainerState::Running;
            container.started_at = Some(epoch_secs());
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout_secs: u32) -> RuntimeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let container = inner
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
        if container.state == ContainerState::Running {
            container.state = ContainerState::Exited;
            container.exit_code = Some(0);
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(container) = inner.containers.get(id) else {
            return Err(RuntimeError::NotFound(format!("no such container: {id}")));
        };
        if container.state == ContainerState::Running && !force {
            return Err(RuntimeError::Conflict(format!(
                "cannot remove running container {id} without force"
            )));
        }
        inner.containers.remove(id);
        Ok(())
    }

    async fn list_containers(&self, label: &str) -> RuntimeResult<Vec<ContainerInspect>> {
        let (key, value) = label.split_once('=').unwrap_or((label, ""));
        let inner = self.inner.lock().unwrap();
        let mut containers: Vec<ContainerInspect> = inner
            .containers
            .iter()
            .filter(|(_, c)| c.spec.labels.get(key).map(String::as_str) == Some(value))
            .map(|(id, c)| Self::project(id, c))
            .collect();
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(containers)
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInspect> {
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .get(id)
            .map(|c| Self::project(id, c))
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PortBinding, Protocol};

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            hostname: "web".to_string(),
            image: "nginx:1.25".to_string(),
            env: vec![],
            labels: HashMap::from([("deployment.name".to_string(), "web".to_string())]),
            ports: vec![PortBinding {
                host: 8080,
                container: 80,
                protocol: Protocol::Tcp,
            }],
            network: "krane".to_string(),
        }
    }

    #[tokio::test]
    async fn container_lifecycle() {
        let runtime = FakeRuntime::new();
        let id = runtime.create_container(&spec("web-1")).await.unwrap();

        let inspect = runtime.inspect_container(&id).await.unwrap();
        assert_eq!(inspect.state, ContainerState::Created);

        runtime.start_container(&id).await.unwrap();
        let inspect = runtime.inspect_container(&id).await.unwrap();
        assert_eq!(inspect.state, ContainerState::Running);
        assert_eq!(inspect.health, Some(HealthState::Healthy));

        runtime.stop_container(&id, 60).await.unwrap();
        let inspect = runtime.inspect_container(&id).await.unwrap();
        assert_eq!(inspect.state, ContainerState::Exited);

        runtime.remove_container(&id, false).await.unwrap();
        assert!(runtime.inspect_container(&id).await.is_err());
    }

    #[tokio::test]
    async fn remove_running_requires_force() {
        let runtime = FakeRuntime::new();
        let id = runtime.create_container(&spec("web-1")).await.unwrap();
        runtime.start_container(&id).await.unwrap();

        let err = runtime.remove_container(&id, false).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Conflict(_)));
        runtime.remove_container(&id, true).await.unwrap();
    }

    #[tokio::test]
    async fn list_filters_by_label() {
        let runtime = FakeRuntime::new();
        runtime.create_container(&spec("web-1")).await.unwrap();
        let mut other = spec("api-1");
        other.labels = HashMap::from([("deployment.name".to_string(), "api".to_string())]);
        runtime.create_container(&other).await.unwrap();

        let listed = runtime.list_containers("deployment.name=web").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "web-1");
    }

    #[tokio::test]
    async fn unknown_image_fails_pull() {
        let runtime = FakeRuntime::new();
        runtime.mark_image_unknown("nginx:does-not-exist");

        let err = runtime
            .pull_image(None, "nginx", "does-not-exist")
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Image(_)));

        runtime.pull_image(None, "nginx", "1.25").await.unwrap();
        assert_eq!(runtime.pulled_images(), vec!["nginx:1.25"]);
    }

    #[tokio::test]
    async fn exit_on_start_simulates_crash() {
        let runtime = FakeRuntime::new();
        runtime.exit_on_start(true);
        let id = runtime.create_container(&spec("web-1")).await.unwrap();
        runtime.start_container(&id).await.unwrap();

        let inspect = runtime.inspect_container(&id).await.unwrap();
        assert_eq!(inspect.state, ContainerState::Exited);
        assert_eq!(inspect.exit_code, Some(1));
        assert_eq!(inspect.health, None);
    }

    #[tokio::test]
    async fn ensure_network_is_idempotent() {
        let runtime = FakeRuntime::new();
        let first = runtime.ensure_network("krane").await.unwrap();
        let second = runtime.ensure_network("krane").await.unwrap();
        assert_eq!(first, second);
    }
}
