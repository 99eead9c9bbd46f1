//! Per-deployment secret records.
//!
//! Each deployment owns a `secrets:<name>` collection created on its first
//! run and deleted with it. Encryption at rest is a concern of the secret
//! storage collaborator; the engine only reads records back to resolve
//! `@KEY` references in a config's environment.

use serde::{Deserialize, Serialize};

use krane_store::Store;

use crate::config::DeploymentConfig;
use crate::epoch_secs;
use crate::error::Result;

/// One secret record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub key: String,
    pub value: String,
    /// Unix seconds when the value was written.
    pub encrypted_at: u64,
}

/// Name of a deployment's secret collection.
pub fn collection(deployment: &str) -> String {
    format!("secrets:{deployment}")
}

/// The secret key referenced by an env value, if it is a reference.
pub fn secret_reference(value: &str) -> Option<&str> {
    value.strip_prefix('@').filter(|key| !key.is_empty())
}

/// Create the deployment's secret collection if absent.
pub fn create_collection(store: &dyn Store, deployment: &str) -> Result<()> {
    store.create_collection(&collection(deployment))?;
    Ok(())
}

/// Delete the deployment's secret collection and every record in it.
pub fn delete_collection(store: &dyn Store, deployment: &str) -> Result<()> {
    store.delete_collection(&collection(deployment))?;
    Ok(())
}

/// Insert or update a secret.
pub fn put(store: &dyn Store, deployment: &str, key: &str, value: &str) -> Result<Secret> {
    let secret = Secret {
        key: key.to_string(),
        value: value.to_string(),
        encrypted_at: epoch_secs(),
    };
    let bytes = serde_json::to_vec(&secret)?;
    store.put(&collection(deployment), key, &bytes)?;
    Ok(secret)
}

/// Read one secret.
pub fn get(store: &dyn Store, deployment: &str, key: &str) -> Result<Secret> {
    let bytes = store.get(&collection(deployment), key)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// All secrets for a deployment, in key order.
pub fn list(store: &dyn Store, deployment: &str) -> Result<Vec<Secret>> {
    let mut secrets = Vec::new();
    for (_, bytes) in store.list(&collection(deployment))? {
        secrets.push(serde_json::from_slice(&bytes)?);
    }
    Ok(secrets)
}

/// Materialize a config's env as `KEY=value` entries, resolving `@KEY`
/// references from the deployment's secret collection. A dangling
/// reference fails the whole resolution.
pub fn resolve_env(store: &dyn Store, config: &DeploymentConfig) -> Result<Vec<String>> {
    let mut env = Vec::with_capacity(config.env.len());
    for (key, value) in &config.env {
        match secret_reference(value) {
            Some(reference) => {
                let secret = get(store, &config.name, reference)?;
                env.push(format!("{key}={}", secret.value));
            }
            None => env.push(format!("{key}={value}")),
        }
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use krane_store::DiskStore;

    #[test]
    fn reference_detection() {
        assert_eq!(secret_reference("@token"), Some("token"));
        assert_eq!(secret_reference("plain"), None);
        assert_eq!(secret_reference("@"), None);
    }

    #[test]
    fn put_get_round_trip() {
        let store = DiskStore::open_in_memory().unwrap();
        create_collection(&store, "web").unwrap();

        put(&store, "web", "token", "s3cret").unwrap();
        let secret = get(&store, "web", "token").unwrap();
        assert_eq!(secret.value, "s3cret");
        assert!(secret.encrypted_at > 0);
    }

    #[test]
    fn list_is_key_ordered() {
        let store = DiskStore::open_in_memory().unwrap();
        create_collection(&store, "web").unwrap();
        put(&store, "web", "b", "2").unwrap();
        put(&store, "web", "a", "1").unwrap();

        let keys: Vec<String> = list(&store, "web").unwrap().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn resolve_env_substitutes_references() {
        let store = DiskStore::open_in_memory().unwrap();
        create_collection(&store, "web").unwrap();
        put(&store, "web", "token", "s3cret").unwrap();

        let config = DeploymentConfig {
            name: "web".to_string(),
            image: "nginx".to_string(),
            env: [
                ("API_TOKEN".to_string(), "@token".to_string()),
                ("MODE".to_string(), "prod".to_string()),
            ]
            .into_iter()
            .collect(),
            secrets: ["token".to_string()].into_iter().collect(),
            ..Default::default()
        };

        let env = resolve_env(&store, &config).unwrap();
        assert_eq!(env, vec!["API_TOKEN=s3cret", "MODE=prod"]);
    }

    #[test]
    fn dangling_reference_fails_resolution() {
        let store = DiskStore::open_in_memory().unwrap();
        create_collection(&store, "web").unwrap();

        let config = DeploymentConfig {
            name: "web".to_string(),
            image: "nginx".to_string(),
            env: [("API_TOKEN".to_string(), "@token".to_string())]
                .into_iter()
                .collect(),
            secrets: ["token".to_string()].into_iter().collect(),
            ..Default::default()
        };

        assert!(resolve_env(&store, &config).is_err());
    }
}
