//! Deployment configuration — the declarative spec for one deployment.
//!
//! Persisted as JSON in the `deployments` collection, keyed by name. The
//! name doubles as container name prefix, network alias, and the key of the
//! deployment's secret and job collections.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use krane_runtime::{image_reference, PortBinding};
use krane_store::{Store, StoreError, DEPLOYMENTS_COLLECTION};

use crate::error::{Error, Result};
use crate::secrets;

const MAX_NAME_LEN: usize = 63;

fn default_scale() -> u32 {
    1
}

/// Declarative spec for one deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    /// Unique deployment name, `[a-z0-9-]{1,63}`.
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    /// Number of containers to run; defaults to 1.
    #[serde(default = "default_scale")]
    pub scale: u32,
    /// Environment entries. A value of the form `@KEY` is resolved from the
    /// deployment's secret collection at container-create time.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Secret keys that `env` values may reference.
    #[serde(default)]
    pub secrets: BTreeSet<String>,
    #[serde(default)]
    pub ports: Vec<PortBinding>,
    /// Hostnames used for ingress labelling, in order.
    #[serde(default)]
    pub alias: Vec<String>,
    /// Container port the ingress proxy targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,
}

impl DeploymentConfig {
    /// Check the config, accumulating every violation.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push("name must not be empty".to_string());
        } else if !valid_name(&self.name) {
            errors.push(format!(
                "name {:?} must match [a-z0-9-]{{1,{MAX_NAME_LEN}}}",
                self.name
            ));
        }

        if self.image.is_empty() {
            errors.push("image must not be empty".to_string());
        }

        if self.scale < 1 {
            errors.push("scale must be >= 1".to_string());
        }

        let mut seen_ports = BTreeSet::new();
        for binding in &self.ports {
            if binding.host != 0 && !seen_ports.insert(binding.host) {
                errors.push(format!("host port {} bound more than once", binding.host));
            }
        }

        for (key, value) in &self.env {
            if let Some(reference) = secrets::secret_reference(value) {
                if !self.secrets.contains(reference) {
                    errors.push(format!(
                        "env {key} references undeclared secret {reference}"
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }

    /// Fill omitted fields: `tag` defaults to `latest`, `scale` to 1.
    pub fn apply_defaults(&mut self) {
        if self.tag.is_empty() {
            self.tag = "latest".to_string();
        }
        if self.scale == 0 {
            self.scale = 1;
        }
    }

    /// The fully qualified image reference, `[registry/]image:tag`.
    pub fn image_reference(&self) -> String {
        image_reference(self.registry.as_deref(), &self.image, &self.tag)
    }

    /// Validate, default, and persist this config.
    pub fn save(&mut self, store: &dyn Store) -> Result<()> {
        self.validate()?;
        self.apply_defaults();
        let bytes = serde_json::to_vec(self)?;
        store.put(DEPLOYMENTS_COLLECTION, &self.name, &bytes)?;
        Ok(())
    }

    /// Load a config by deployment name.
    pub fn load(store: &dyn Store, name: &str) -> Result<Self> {
        match store.get(DEPLOYMENTS_COLLECTION, name) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(StoreError::Missing(_)) => Err(Error::DeploymentMissing(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// All stored configs, in name order.
    pub fn list(store: &dyn Store) -> Result<Vec<Self>> {
        let mut configs = Vec::new();
        for (_, bytes) in store.list(DEPLOYMENTS_COLLECTION)? {
            configs.push(serde_json::from_slice(&bytes)?);
        }
        Ok(configs)
    }

    /// Remove a stored config.
    pub fn delete(store: &dyn Store, name: &str) -> Result<()> {
        store.delete(DEPLOYMENTS_COLLECTION, name)?;
        Ok(())
    }
}

fn valid_name(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
