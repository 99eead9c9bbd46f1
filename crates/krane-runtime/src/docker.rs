//! Docker implementation of the runtime port, via bollard.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    NetworkingConfig, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, ContainerStateStatusEnum, EndpointSettings,
    HealthStatusEnum, HostConfig};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use futures_util::StreamExt;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{image_reference, Runtime};
use crate::types::{ContainerInspect, ContainerSpec, ContainerState, HealthState, PortBinding,
    Protocol};

/// Runtime backed by the local Docker engine.
///
/// Connection parameters come from the environment (`DOCKER_HOST` et al.),
/// falling back to the platform's default socket.
#[derive(Clone)]
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker engine.
    pub fn connect() -> RuntimeResult<Self> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

/// Map a bollard error onto the port's error kinds.
fn map_err(e: bollard::errors::Error) -> RuntimeError {
    use bollard::errors::Error as E;
    match e {
        E::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            404 => RuntimeError::NotFound(message),
            409 => RuntimeError::Conflict(message),
            _ => RuntimeError::Internal(message),
        },
        E::IOError { .. } | E::RequestTimeoutError => RuntimeError::Unavailable(e.to_string()),
        other => RuntimeError::Internal(other.to_string()),
    }
}

/// Pull failures are image errors regardless of transport detail.
fn map_pull_err(e: bollard::errors::Error) -> RuntimeError {
    use bollard::errors::Error as E;
    match e {
        E::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::Image(message),
        E::DockerStreamError { error } => RuntimeError::Image(error),
        other => map_err(other),
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    async fn ensure_network(&self, name: &str) -> RuntimeResult<String> {
        // The name filter is a substring match; confirm equality ourselves.
        let filters = HashMap::from([("name".to_string(), vec![name.to_string()])]);
        let networks = self
            .client
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(map_err)?;

        for net in networks {
            if net.name.as_deref() == Some(name) {
                if let Some(id) = net.id {
                    return Ok(id);
                }
            }
        }

        let created = self
            .client
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                driver: "bridge".to_string(),
                check_duplicate: true,
                ..Default::default()
            })
            .await
            .map_err(map_err)?;

        debug!(network = name, "bridge network created");
        created
            .id
            .ok_or_else(|| RuntimeError::Internal(format!("network {name} created without an id")))
    }

    async fn pull_image(
        &self,
        registry: Option<&str>,
        image: &str,
        tag: &str,
    ) -> RuntimeResult<()> {
        let reference = image_reference(registry, image, tag);
        let (from_image, tag) = reference
            .rsplit_once(':')
            .map(|(i, t)| (i.to_string(), t.to_string()))
            .unwrap_or((reference.clone(), "latest".to_string()));

        let mut stream = self.client.create_image(
            Some(CreateImageOptions {
                from_image,
                tag,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            progress.map_err(map_pull_err)?;
        }
        debug!(image = reference, "image pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let mut port_bindings = HashMap::new();
        let mut exposed_ports = HashMap::new();
        for binding in &spec.ports {
            let container_port = format!("{}/{}", binding.container, binding.protocol);
            let host_port = if binding.host == 0 {
                // Empty host port asks the engine for an ephemeral one.
                String::new()
            } else {
                binding.host.to_string()
            };
            exposed_ports.insert(container_port.clone(), HashMap::new());
            port_bindings.insert(
                container_port,
                Some(vec![bollard::models::PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port),
                }]),
            );
        }

        let endpoints_config = HashMap::from([(
            spec.network.clone(),
            EndpointSettings::default(),
        )]);

        let config = Config {
            image: Some(spec.image.clone()),
            hostname: Some(spec.hostname.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            networking_config: Some(NetworkingConfig { endpoints_config }),
            ..Default::default()
        };

        let created = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(map_err)?;

        debug!(container = spec.name, id = created.id, "container created");
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_err)
    }

    async fn stop_container(&self, id: &str, timeout_secs: u32) -> RuntimeResult<()> {
        self.client
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: timeout_secs as i64,
                }),
            )
            .await
            .map_err(map_err)
    }

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
        self.client
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_err)
    }

    async fn list_containers(&self, label: &str) -> RuntimeResult<Vec<ContainerInspect>> {
        let filters = HashMap::from([("label".to_string(), vec![label.to_string()])]);
        let summaries = self
            .client
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(map_err)?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else { continue };
            containers.push(self.inspect_container(&id).await?);
        }
        Ok(containers)
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInspect> {
        let resp = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_err)?;
        Ok(project_inspect(resp))
    }
}

/// Project the engine's inspect payload into the port's view.
fn project_inspect(resp: ContainerInspectResponse) -> ContainerInspect {
    let state = resp.state.as_ref();

    let status = state
        .and_then(|s| s.status)
        .map(|s| match s {
            ContainerStateStatusEnum::CREATED => ContainerState::Created,
            ContainerStateStatusEnum::RUNNING => ContainerState::Running,
            ContainerStateStatusEnum::RESTARTING => ContainerState::Restarting,
            ContainerStateStatusEnum::PAUSED => ContainerState::Paused,
            ContainerStateStatusEnum::EXITED => ContainerState::Exited,
            _ => ContainerState::Dead,
        })
        .unwrap_or(ContainerState::Dead);

    let health = state
        .and_then(|s| s.health.as_ref())
        .and_then(|h| h.status)
        .and_then(|s| match s {
            HealthStatusEnum::STARTING => Some(HealthState::Starting),
            HealthStatusEnum::HEALTHY => Some(HealthState::Healthy),
            HealthStatusEnum::UNHEALTHY => Some(HealthState::Unhealthy),
            _ => None,
        });

    let ports = resp
        .network_settings
        .as_ref()
        .and_then(|n| n.ports.as_ref())
        .map(|port_map| {
            let mut ports = Vec::new();
            for (container_port, bindings) in port_map {
                let Some((port, protocol)) = parse_port_key(container_port) else {
                    continue;
                };
                let host = bindings
                    .as_ref()
                    .and_then(|b| b.first())
                    .and_then(|b| b.host_port.as_deref())
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(0);
                ports.push(PortBinding {
                    host,
                    container: port,
                    protocol,
                });
            }
            ports
        })
        .unwrap_or_default();

    let image = resp
        .config
        .as_ref()
        .and_then(|c| c.image.clone())
        .unwrap_or_default();

    ContainerInspect {
        id: resp.id.unwrap_or_default(),
        name: resp
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        image,
        state: status,
        exit_code: state.and_then(|s| s.exit_code),
        restart_count: resp.restart_count.unwrap_or(0).max(0) as u32,
        health,
        started_at: state
            .and_then(|s| s.started_at.as_deref())
            .and_then(parse_engine_time),
        created_at: resp.created.as_deref().and_then(parse_engine_time).unwrap_or(0),
        labels: resp.config.and_then(|c| c.labels).unwrap_or_default(),
        ports,
    }
}

/// Parse a `"80/tcp"`-style port map key.
fn parse_port_key(key: &str) -> Option<(u16, Protocol)> {
    let (port, protocol) = key.split_once('/')?;
    let protocol = match protocol {
        "udp" => Protocol::Udp,
        _ => Protocol::Tcp,
    };
    Some((port.parse().ok()?, protocol))
}

/// Parse an engine RFC 3339 timestamp into unix seconds.
///
/// The engine reports `0001-01-01T00:00:00Z` for "never"; that and anything
/// else before the epoch map to `None`.
fn parse_engine_time(s: &str) -> Option<u64> {
    let parsed = chrono::DateTime::parse_from_rfc3339(s).ok()?;
    let secs = parsed.timestamp();
    (secs > 0).then_some(secs as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_key_parsing() {
        assert_eq!(parse_port_key("80/tcp"), Some((80, Protocol::Tcp)));
        assert_eq!(parse_port_key("53/udp"), Some((53, Protocol::Udp)));
        assert_eq!(parse_port_key("garbage"), None);
    }

    #[test]
    fn engine_time_parsing() {
        assert_eq!(
            parse_engine_time("2024-05-01T12:00:00Z"),
            Some(1_714_564_800)
        );
        // Docker's zero value for a container that never started.
        assert_eq!(parse_engine_time("0001-01-01T00:00:00Z"), None);
        assert_eq!(parse_engine_time("not a time"), None);
    }
}
