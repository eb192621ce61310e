//! Container runtime access.
//!
//! The [`ContainerRuntime`] trait abstracts the handful of Docker Engine
//! operations the fleet controllers need, allowing a mock implementation in
//! tests. [`DockerRuntime`] is the production implementation over bollard.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::service::{ContainerSummary, HostConfig, PortBinding};
use bollard::Docker;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

/// Seconds a container is given to stop before the engine kills it.
const STOP_GRACE_SECS: i64 = 10;

/// Everything needed to create and start one container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Labels attached to the container.
    pub labels: HashMap<String, String>,
    /// Port the application listens on inside the container.
    pub container_port: Option<u16>,
    /// Host port published for `container_port`.
    pub host_port: Option<u16>,
    /// Bind mounts in `host:container` form.
    pub binds: Vec<String>,
    /// Command override.
    pub cmd: Option<Vec<String>>,
}

impl ContainerSpec {
    /// Creates a spec for `name` running `image`.
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Self::default()
        }
    }
}

/// Observed state of one container.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    /// Container name (no leading slash).
    pub name: String,
    /// Runtime status string (`running`, `exited`, ...).
    pub status: String,
    /// Creation time as reported by the engine.
    pub created_at: Option<DateTime<Utc>>,
    /// Published host port, if any.
    pub host_port: Option<u16>,
    /// Container labels.
    pub labels: HashMap<String, String>,
}

/// Trait over the container engine operations the controllers use.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates and starts a container, returning its engine id.
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String>;

    /// Stops (best-effort) and removes a container by name.
    async fn stop_and_remove(&self, name: &str) -> Result<()>;

    /// Resolves a container by exact name; `None` if it does not exist.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// Lists containers whose name starts with `prefix` (running or not).
    async fn list(&self, prefix: &str) -> Result<Vec<ContainerInfo>>;

    /// Waits until a container exits, returning its exit code.
    async fn wait_exit(&self, name: &str, timeout: Duration) -> Result<i64>;
}

/// Docker Engine implementation of [`ContainerRuntime`].
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker Engine and verifies it responds.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine socket is unreachable.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        if let Some(container_port) = spec.container_port {
            let key = format!("{container_port}/tcp");
            exposed_ports.insert(key.clone(), HashMap::new());
            let binding = PortBinding {
                host_ip: None,
                host_port: spec.host_port.map(|port| port.to_string()),
            };
            port_bindings.insert(key, Some(vec![binding]));
        }

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            cmd: spec.cmd.clone(),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self.docker.create_container(Some(options), config).await?;
        self.docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await?;

        tracing::debug!(container = %spec.name, id = %response.id, "created and started container");
        Ok(response.id)
    }

    async fn stop_and_remove(&self, name: &str) -> Result<()> {
        let stop_options = StopContainerOptions { t: STOP_GRACE_SECS };
        if let Err(e) = self.docker.stop_container(name, Some(stop_options)).await {
            tracing::warn!(container = %name, error = %e, "failed to stop container, removing anyway");
        }

        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(name, Some(remove_options)).await?;

        tracing::debug!(container = %name, "removed container");
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        match self.docker.inspect_container(name, None).await {
            Ok(response) => Ok(Some(inspect_to_info(name, &response))),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ContainerInfo>> {
        let filters: HashMap<String, Vec<String>> =
            [("name".to_string(), vec![prefix.to_string()])]
                .into_iter()
                .collect();

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let summaries = self.docker.list_containers(Some(options)).await?;
        // The engine's name filter matches substrings; keep exact prefixes only.
        Ok(summaries
            .iter()
            .filter_map(summary_to_info)
            .filter(|info| info.name.starts_with(prefix))
            .collect())
    }

    async fn wait_exit(&self, name: &str, timeout: Duration) -> Result<i64> {
        let mut stream = self
            .docker
            .wait_container(name, None::<WaitContainerOptions<String>>);

        match tokio::time::timeout(timeout, stream.next()).await {
            Ok(Some(Ok(response))) => Ok(response.status_code),
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(None) => Err(CoreError::Runtime(format!(
                "wait stream for {name} ended without a result"
            ))),
            Err(_) => Err(CoreError::Runtime(format!(
                "container {name} did not exit within {}s",
                timeout.as_secs()
            ))),
        }
    }
}

fn inspect_to_info(
    name: &str,
    response: &bollard::service::ContainerInspectResponse,
) -> ContainerInfo {
    let status = response
        .state
        .as_ref()
        .and_then(|state| state.status)
        .map_or_else(|| "unknown".to_string(), |status| status.to_string());

    let created_at = response
        .created
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let host_port = response
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.as_ref())
        .and_then(first_bound_port);

    let labels = response
        .config
        .as_ref()
        .and_then(|config| config.labels.clone())
        .unwrap_or_default();

    ContainerInfo {
        name: normalize_name(response.name.as_deref().unwrap_or(name)),
        status,
        created_at,
        host_port,
        labels,
    }
}

fn summary_to_info(summary: &ContainerSummary) -> Option<ContainerInfo> {
    let name = summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|raw| normalize_name(raw))?;

    let created_at = summary
        .created
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    let host_port = summary
        .ports
        .as_ref()
        .and_then(|ports| ports.iter().find_map(|port| port.public_port));

    Some(ContainerInfo {
        name,
        status: summary
            .state
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        created_at,
        host_port,
        labels: summary.labels.clone().unwrap_or_default(),
    })
}

fn first_bound_port(
    ports: &HashMap<String, Option<Vec<PortBinding>>>,
) -> Option<u16> {
    ports
        .values()
        .flatten()
        .flatten()
        .find_map(|binding| binding.host_port.as_deref()?.parse().ok())
}

fn normalize_name(raw: &str) -> String {
    raw.trim_start_matches('/').to_string()
}
