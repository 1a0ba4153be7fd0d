//! Mapping between crate requests and bollard's API types.

use crate::container::{ContainerRequest, ExposedPort};
use crate::runtime::{ContainerSummary, HealthStatus};
use bollard::container::Config as BollardConfig;
use bollard::models::{ContainerInspectResponse, HealthStatusEnum, HostConfig};
use std::collections::HashMap;

/// Docker's key for a port: `6379/tcp`.
pub(super) fn port_key(port: ExposedPort) -> String {
    port.to_string()
}

/// Container create body for `request`.
///
/// Exposed ports are published on host ports chosen by the daemon.
pub(super) fn container_config(request: &ContainerRequest) -> BollardConfig<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = request
        .exposed_ports
        .iter()
        .map(|port| (port_key(*port), HashMap::new()))
        .collect();

    let host_config = HostConfig {
        memory: request.resources.memory_bytes,
        memory_swap: request.resources.memory_swap_bytes,
        nano_cpus: request.resources.nano_cpus,
        cpu_shares: request.resources.cpu_shares,
        cap_add: (!request.cap_add.is_empty()).then(|| request.cap_add.clone()),
        cap_drop: (!request.cap_drop.is_empty()).then(|| request.cap_drop.clone()),
        privileged: Some(request.privileged),
        publish_all_ports: Some(!exposed_ports.is_empty()),
        network_mode: request.network.clone(),
        ..Default::default()
    };

    BollardConfig {
        image: Some(request.image.clone()),
        cmd: request.cmd.clone(),
        entrypoint: request.entrypoint.clone(),
        env: Some(request.env_pairs()),
        working_dir: request.working_dir.clone(),
        user: request.user.clone(),
        labels: Some(request.labels.clone().into_iter().collect()),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Host port bound to `port`, from an inspect response.
pub(super) fn host_port(inspect: &ContainerInspectResponse, port: ExposedPort) -> Option<u16> {
    inspect
        .network_settings
        .as_ref()?
        .ports
        .as_ref()?
        .get(&port_key(port))?
        .as_ref()?
        .iter()
        .find_map(|binding| binding.host_port.as_deref()?.parse().ok())
}

pub(super) fn health(inspect: &ContainerInspectResponse) -> HealthStatus {
    let status = inspect
        .state
        .as_ref()
        .and_then(|state| state.health.as_ref())
        .and_then(|health| health.status);

    match status {
        Some(HealthStatusEnum::HEALTHY) => HealthStatus::Healthy,
        Some(HealthStatusEnum::UNHEALTHY) => HealthStatus::Unhealthy,
        Some(HealthStatusEnum::STARTING) => HealthStatus::Starting,
        Some(HealthStatusEnum::NONE) | Some(HealthStatusEnum::EMPTY) | None => {
            HealthStatus::NotConfigured
        }
    }
}

pub(super) fn is_running(inspect: &ContainerInspectResponse) -> bool {
    inspect
        .state
        .as_ref()
        .and_then(|state| state.running)
        .unwrap_or(false)
}

pub(super) fn ip_address(inspect: &ContainerInspectResponse, network: &str) -> Option<String> {
    inspect
        .network_settings
        .as_ref()?
        .networks
        .as_ref()?
        .get(network)?
        .ip_address
        .clone()
        .filter(|ip| !ip.is_empty())
}

pub(super) fn summary(container: bollard::models::ContainerSummary) -> Option<ContainerSummary> {
    let id = container.id?;
    let running = container
        .state
        .map(|state| state.to_string() == "running")
        .unwrap_or(false);
    Some(ContainerSummary {
        id,
        name: container
            .names
            .and_then(|names| names.into_iter().next())
            .map(|name| name.trim_start_matches('/').to_string()),
        image: container.image,
        running,
    })
}

/// `label` filters matching every entry of `labels`.
pub(super) fn label_filters<'a, I>(labels: I) -> HashMap<String, Vec<String>>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let values = labels
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    HashMap::from([("label".to_string(), values)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ResourceLimits;
    use bollard::models::{NetworkSettings, PortBinding};
    use std::collections::BTreeMap;

    fn request() -> ContainerRequest {
        ContainerRequest {
            name: Some("cache".into()),
            image: "redis:7".into(),
            cmd: Some(vec!["redis-server".into()]),
            entrypoint: None,
            env: BTreeMap::from([("A".into(), "1".into())]),
            working_dir: None,
            user: None,
            labels: BTreeMap::from([("testenv.managed".into(), "true".into())]),
            resources: ResourceLimits {
                memory_bytes: Some(256 * 1024 * 1024),
                ..Default::default()
            },
            cap_add: vec!["NET_ADMIN".into()],
            cap_drop: Vec::new(),
            privileged: false,
            network: Some("backend".into()),
            exposed_ports: vec![ExposedPort::tcp(6379).unwrap()],
        }
    }

    #[test]
    fn test_container_config() {
        let config = container_config(&request());

        assert_eq!(config.image.as_deref(), Some("redis:7"));
        assert_eq!(config.env, Some(vec!["A=1".to_string()]));
        assert!(config.exposed_ports.unwrap().contains_key("6379/tcp"));

        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.cap_add, Some(vec!["NET_ADMIN".to_string()]));
        assert_eq!(host.cap_drop, None);
        assert_eq!(host.publish_all_ports, Some(true));
        assert_eq!(host.network_mode.as_deref(), Some("backend"));
    }

    #[test]
    fn test_host_port_lookup() {
        let inspect = ContainerInspectResponse {
            network_settings: Some(NetworkSettings {
                ports: Some(HashMap::from([(
                    "6379/tcp".to_string(),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".into()),
                        host_port: Some("49153".into()),
                    }]),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(host_port(&inspect, ExposedPort::tcp(6379).unwrap()), Some(49153));
        assert_eq!(host_port(&inspect, ExposedPort::tcp(80).unwrap()), None);
    }

    #[test]
    fn test_missing_health_is_not_configured() {
        assert_eq!(
            health(&ContainerInspectResponse::default()),
            HealthStatus::NotConfigured
        );
    }
}
