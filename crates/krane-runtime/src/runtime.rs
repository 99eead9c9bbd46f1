//! The runtime port.

use async_trait::async_trait;

use crate::error::RuntimeResult;
use crate::types::{ContainerInspect, ContainerSpec};

/// Port to the local container engine.
///
/// Implementations are shared behind an `Arc` and injected into the
/// reconciler; a single instance serves the whole process.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Return the ID of the named bridge network, creating it if absent.
    /// Idempotent and safe to call concurrently.
    async fn ensure_network(&self, name: &str) -> RuntimeResult<String>;

    /// Pull an image so it is present locally at the resolved reference.
    /// Blocks until the pull completes; there is no hard timeout (images
    /// can be large).
    async fn pull_image(&self, registry: Option<&str>, image: &str, tag: &str)
        -> RuntimeResult<()>;

    /// Create a container from the spec. Does not start it.
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    /// Start a created container.
    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    /// Stop a running container, killing it after `timeout_secs`.
    async fn stop_container(&self, id: &str, timeout_secs: u32) -> RuntimeResult<()>;

    /// Remove a container. `force` removes it even while running.
    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()>;

    /// All containers (in any state) whose labels match `key=value`.
    async fn list_containers(&self, label: &str) -> RuntimeResult<Vec<ContainerInspect>>;

    /// Inspect one container by ID.
    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInspect>;
}

/// Resolve `[registry/]image:tag`, defaulting the tag to `latest`.
pub fn image_reference(registry: Option<&str>, image: &str, tag: &str) -> String {
    let tag = if tag.is_empty() { "latest" } else { tag };
    match registry {
        Some(registry) if !registry.is_empty() => format!("{registry}/{image}:{tag}"),
        _ => format!("{image}:{tag}"),
    }
}
