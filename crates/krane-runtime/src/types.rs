//! Domain types crossing the runtime port.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A host-to-container port mapping. `host` 0 requests an ephemeral port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host: u16,
    pub container: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

/// Transport protocol for a port binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Everything the runtime needs to create one container.
///
/// Creation does not start the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Unique container name on this host.
    pub name: String,
    /// Hostname inside the container.
    pub hostname: String,
    /// Fully qualified image reference (`[registry/]image:tag`).
    pub image: String,
    /// Environment entries in `KEY=value` form.
    pub env: Vec<String>,
    /// Labels; must include the owning deployment's `deployment.name`.
    pub labels: HashMap<String, String>,
    /// Port bindings published on `0.0.0.0`.
    pub ports: Vec<PortBinding>,
    /// Name of the bridge network to attach to.
    pub network: String,
}

/// Lifecycle state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Restarting,
    Exited,
    Paused,
    Dead,
}

impl ContainerState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ContainerState::Created),
            "running" => Some(ContainerState::Running),
            "restarting" => Some(ContainerState::Restarting),
            "exited" => Some(ContainerState::Exited),
            "paused" => Some(ContainerState::Paused),
            "dead" => Some(ContainerState::Dead),
            _ => None,
        }
    }

    /// True for states a container cannot leave on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContainerState::Exited | ContainerState::Dead)
    }
}

/// Health as reported by the engine's configured health command, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Starting,
    Healthy,
    Unhealthy,
}

/// Point-in-time view of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspect {
    pub id: String,
    pub name: String,
    /// Image reference the container was created from.
    pub image: String,
    pub state: ContainerState,
    pub exit_code: Option<i64>,
    pub restart_count: u32,
    /// Engine-reported health; `None` when no health command is configured.
    pub health: Option<HealthState>,
    /// Unix seconds when the container entered `running`, if it ever did.
    pub started_at: Option<u64>,
    /// Unix seconds when the container was created.
    pub created_at: u64,
    pub labels: HashMap<String, String>,
    /// Published port bindings (ephemeral requests resolved to real ports).
    pub ports: Vec<PortBinding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_parse_round_trip() {
        for (s, state) in [
            ("created", ContainerState::Created),
            ("running", ContainerState::Running),
            ("restarting", ContainerState::Restarting),
            ("exited", ContainerState::Exited),
            ("paused", ContainerState::Paused),
            ("dead", ContainerState::Dead),
        ] {
            assert_eq!(ContainerState::parse(s), Some(state));
        }
        assert_eq!(ContainerState::parse("removing"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(ContainerState::Exited.is_terminal());
        assert!(ContainerState::Dead.is_terminal());
        assert!(!ContainerState::Running.is_terminal());
        assert!(!ContainerState::Created.is_terminal());
    }

    #[test]
    fn protocol_defaults_to_tcp() {
        let binding: PortBinding = serde_json::from_str(r#"{"host":8080,"container":80}"#).unwrap();
        assert_eq!(binding.protocol, Protocol::Tcp);
    }
}
