//! Container label assembly.
//!
//! Every managed container carries `deployment.name` for ownership
//! discovery. Configs with aliases additionally get ingress labels for the
//! sidecar proxy; those are opaque strings from the engine's point of view
//! and are never parsed back.

use std::collections::HashMap;

use crate::config::DeploymentConfig;
use crate::DEPLOYMENT_LABEL;

/// Build the full label set for a container of this deployment.
pub fn container_labels(config: &DeploymentConfig) -> HashMap<String, String> {
    let mut labels = HashMap::from([(DEPLOYMENT_LABEL.to_string(), config.name.clone())]);

    if !config.alias.is_empty() {
        labels.insert("traefik.enable".to_string(), "true".to_string());

        let rule = config
            .alias
            .iter()
            .map(|alias| format!("Host(`{alias}`)"))
            .collect::<Vec<_>>()
            .join(" || ");
        labels.insert(
            format!("traefik.http.routers.{}.rule", config.name),
            rule,
        );

        if let Some(port) = config.target_port {
            labels.insert(
                format!(
                    "traefik.http.services.{}.loadbalancer.server.port",
                    config.name
                ),
                port.to_string(),
            );
        }
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_label_is_always_present() {
        let config = DeploymentConfig {
            name: "web".to_string(),
            image: "nginx".to_string(),
            ..Default::default()
        };
        let labels = container_labels(&config);
        assert_eq!(labels.get(DEPLOYMENT_LABEL).map(String::as_str), Some("web"));
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn aliases_produce_ingress_labels() {
        let config = DeploymentConfig {
            name: "web".to_string(),
            image: "nginx".to_string(),
            alias: vec!["example.com".to_string(), "www.example.com".to_string()],
            target_port: Some(80),
            ..Default::default()
        };
        let labels = container_labels(&config);

        assert_eq!(labels.get("traefik.enable").map(String::as_str), Some("true"));
        assert_eq!(
            labels.get("traefik.http.routers.web.rule").map(String::as_str),
            Some("Host(`example.com`) || Host(`www.example.com`)")
        );
        assert_eq!(
            labels
                .get("traefik.http.services.web.loadbalancer.server.port")
                .map(String::as_str),
            Some("80")
        );
    }
}
