//! Docker-backed [`ContainerRuntime`].
//!
//! Talks to the daemon through bollard and falls back to the docker CLI for
//! image builds and file copies.

mod cli;
mod translate;

use crate::container::{
    BuildSpec, ContainerRequest, CopyToContainer, ExecConfig, ExecOutput, ExposedPort,
};
use crate::error::{Error, Result};
use crate::runtime::{
    BuildFailure, BuildFailureReason, ContainerRuntime, ContainerSummary, HealthStatus, LogLine,
    LogStream, RuntimeResult,
};
use crate::settings::Settings;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use futures::stream::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Runtime backed by a Docker (or API compatible) daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    docker_host: Option<String>,
    host: String,
    docker_binary: Option<PathBuf>,
    stop_timeout: i64,
}

impl fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerRuntime")
            .field("docker_host", &self.docker_host)
            .field("host", &self.host)
            .field("docker_binary", &self.docker_binary)
            .finish()
    }
}

impl DockerRuntime {
    /// Connect to the daemon named by `settings` and verify it answers.
    ///
    /// # Errors
    ///
    /// Returns a permission error when the socket is not accessible to the
    /// current user, and a daemon unavailable error for any other failure.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let docker_host = settings.docker_host.clone();
        let candidates = match &docker_host {
            Some(host) => vec![Some(host.clone())],
            None => {
                let mut candidates = vec![None];
                candidates.extend(podman_sockets().into_iter().map(Some));
                candidates
            }
        };

        let mut last_error = None;
        let mut connected = None;
        for candidate in candidates {
            match Self::try_connect(candidate.as_deref()).await {
                Ok(docker) => {
                    info!(
                        "Connected to container runtime via {}",
                        candidate.as_deref().unwrap_or("local defaults")
                    );
                    connected = Some((docker, candidate));
                    break;
                }
                Err(e) => {
                    debug!(
                        "Connection via {} failed: {}",
                        candidate.as_deref().unwrap_or("local defaults"),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        let Some((docker, resolved_host)) = connected else {
            return Err(connection_error(docker_host, last_error));
        };

        // A missing CLI only matters for builds and copies.
        let docker_binary = match which::which(&settings.docker_binary) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(
                    "docker CLI `{}` not found, image builds and file copies are unavailable: {}",
                    settings.docker_binary, e
                );
                None
            }
        };

        Ok(Self {
            host: published_host(resolved_host.as_deref()),
            docker,
            docker_host: resolved_host,
            docker_binary,
            stop_timeout: i64::try_from(settings.stop_timeout_secs).unwrap_or(i64::MAX),
        })
    }

    async fn try_connect(docker_host: Option<&str>) -> std::result::Result<Docker, bollard::errors::Error> {
        let docker = Self::client(docker_host)?;
        docker.ping().await?;
        Ok(docker)
    }

    fn client(docker_host: Option<&str>) -> std::result::Result<Docker, bollard::errors::Error> {
        match transport(docker_host) {
            Transport::LocalDefaults => Docker::connect_with_local_defaults(),
            Transport::Socket(socket) => {
                Docker::connect_with_socket(socket, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
            Transport::Http(address) => {
                Docker::connect_with_http(address, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
        }
    }

    /// Underlying bollard client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    fn cli(&self) -> RuntimeResult<&PathBuf> {
        self.docker_binary
            .as_ref()
            .ok_or_else(|| anyhow!("docker CLI is not installed"))
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<bollard::models::ContainerInspectResponse> {
        self.docker
            .inspect_container(id, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
            .with_context(|| format!("failed to inspect container {id}"))
    }

    async fn stop_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .stop_container(
                id,
                Some(bollard::container::StopContainerOptions {
                    t: self.stop_timeout,
                }),
            )
            .await?;
        Ok(())
    }
}

/// How a daemon address is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport<'a> {
    LocalDefaults,
    Socket(&'a str),
    Http(&'a str),
}

fn transport(docker_host: Option<&str>) -> Transport<'_> {
    match docker_host {
        None => Transport::LocalDefaults,
        Some(host) if host.starts_with("unix://") || host.starts_with("npipe://") => {
            Transport::Socket(host)
        }
        Some(host) => Transport::Http(host),
    }
}

/// Rootless then system Podman sockets, tried after the Docker defaults.
fn podman_sockets() -> Vec<String> {
    let mut sockets = Vec::new();
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        sockets.push(format!("unix://{runtime_dir}/podman/podman.sock"));
    }
    sockets.push("unix:///run/podman/podman.sock".to_string());
    sockets
}

fn connection_error(docker_host: Option<String>, cause: Option<bollard::errors::Error>) -> Error {
    let Some(cause) = cause else {
        return Error::daemon_unavailable(docker_host, "no container runtime socket to try");
    };
    if cause.to_string().to_lowercase().contains("permission denied") {
        Error::daemon_permission_denied(
            docker_host,
            "permission denied while connecting to the docker daemon",
        )
        .with_source(cause)
    } else {
        Error::daemon_unavailable(
            docker_host,
            "failed to connect to Docker or Podman; ensure a daemon is running",
        )
        .with_source(cause)
    }
}

/// Host on which published ports are reachable for `docker_host`.
fn published_host(docker_host: Option<&str>) -> String {
    docker_host
        .filter(|host| host.starts_with("tcp://") || host.starts_with("http"))
        .and_then(|host| url::Url::parse(host).ok())
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}

fn log_line(output: LogOutput) -> LogLine {
    match output {
        LogOutput::StdErr { message } => {
            LogLine::Stderr(String::from_utf8_lossy(&message).into_owned())
        }
        LogOutput::StdOut { message }
        | LogOutput::Console { message }
        | LogOutput::StdIn { message } => {
            LogLine::Stdout(String::from_utf8_lossy(&message).into_owned())
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn host(&self) -> String {
        self.host.clone()
    }

    fn docker_host(&self) -> Option<String> {
        self.docker_host.clone()
    }

    async fn image_exists(&self, image: &str) -> RuntimeResult<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        info!("Pulling image: {}", image);

        let mut stream = self.docker.create_image(
            Some(bollard::image::CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(status) = info.status {
                debug!("Pull: {}", status);
            }
            if let Some(error) = info.error {
                return Err(anyhow!("pull failed: {error}"));
            }
        }

        info!("Successfully pulled image: {}", image);
        Ok(())
    }

    async fn build_image(&self, spec: &BuildSpec, tag: &str) -> std::result::Result<(), BuildFailure> {
        let binary = self
            .cli()
            .map_err(|e| BuildFailure::new(BuildFailureReason::Other, e.to_string()))?;
        cli::build(binary, self.docker_host.as_deref(), spec, tag).await
    }

    async fn find_container(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> RuntimeResult<Option<ContainerSummary>> {
        let containers = self
            .docker
            .list_containers(Some(bollard::container::ListContainersOptions {
                all: true,
                filters: translate::label_filters(labels),
                ..Default::default()
            }))
            .await?;

        Ok(containers.into_iter().find_map(translate::summary))
    }

    async fn create_container(&self, request: &ContainerRequest) -> RuntimeResult<String> {
        let options = request
            .name
            .as_deref()
            .map(|name| bollard::container::CreateContainerOptions {
                name,
                ..Default::default()
            });

        debug!("Creating container from {}", request.image);
        let response = self
            .docker
            .create_container(options, translate::container_config(request))
            .await?;

        for warning in &response.warnings {
            warn!("Docker: {}", warning);
        }
        info!("Created container: {}", response.id);
        Ok(response.id)
    }

    async fn copy_to_container(&self, id: &str, copy: &CopyToContainer) -> RuntimeResult<()> {
        cli::copy(self.cli()?, self.docker_host.as_deref(), id, copy).await
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .start_container(id, None::<bollard::container::StartContainerOptions<String>>)
            .await?;
        info!("Started container: {}", id);
        Ok(())
    }

    async fn is_running(&self, id: &str) -> RuntimeResult<bool> {
        Ok(translate::is_running(&self.inspect(id).await?))
    }

    async fn mapped_port(&self, id: &str, port: ExposedPort) -> RuntimeResult<Option<u16>> {
        Ok(translate::host_port(&self.inspect(id).await?, port))
    }

    async fn exec(&self, id: &str, config: &ExecConfig) -> RuntimeResult<ExecOutput> {
        debug!("Executing command in container {}: {:?}", id, config.cmd());

        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(config.cmd().to_vec()),
                    env: Some(config.env_pairs()),
                    working_dir: config.working_dir().map(str::to_string),
                    user: config.user().map(str::to_string),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(false),
                    privileged: Some(config.privileged()),
                    ..Default::default()
                },
            )
            .await?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match log_line(chunk?) {
                        LogLine::Stdout(text) => stdout.push_str(&text),
                        LogLine::Stderr(text) => stderr.push_str(&text),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(anyhow!("exec started detached, output unavailable"));
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: inspect.exit_code,
        })
    }

    async fn logs(&self, id: &str) -> RuntimeResult<String> {
        let mut stream = self.docker.logs(
            id,
            Some(bollard::container::LogsOptions {
                stdout: true,
                stderr: true,
                tail: "all".to_string(),
                ..Default::default()
            }),
        );

        let mut output = String::new();
        while let Some(log) = stream.next().await {
            output.push_str(&log?.to_string());
        }
        Ok(output)
    }

    fn log_stream(&self, id: &str, follow: bool) -> LogStream {
        self.docker
            .logs(
                id,
                Some(bollard::container::LogsOptions {
                    follow,
                    stdout: true,
                    stderr: true,
                    tail: "all".to_string(),
                    ..Default::default()
                }),
            )
            .map(|chunk| chunk.map(log_line).map_err(anyhow::Error::from))
            .boxed()
    }

    async fn health(&self, id: &str) -> RuntimeResult<HealthStatus> {
        Ok(translate::health(&self.inspect(id).await?))
    }

    async fn restart_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .restart_container(id, None::<bollard::query_parameters::RestartContainerOptions>)
            .await?;
        info!("Restarted container: {}", id);
        Ok(())
    }

    async fn ip_address(&self, id: &str, network: &str) -> RuntimeResult<Option<String>> {
        Ok(translate::ip_address(&self.inspect(id).await?, network))
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> RuntimeResult<String> {
        debug!("Creating network: {}", name);

        let labels: HashMap<&str, &str> = labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let response = self
            .docker
            .create_network(bollard::network::CreateNetworkOptions {
                name,
                driver: "bridge",
                labels,
                ..Default::default()
            })
            .await?;

        info!("Created network: {} ({})", name, response.id);
        Ok(response.id)
    }

    async fn remove_network(&self, id: &str) -> RuntimeResult<()> {
        self.docker.remove_network(id).await?;
        info!("Removed network: {}", id);
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        if let Err(e) = self.stop_container(id).await {
            debug!("Stop before removal of {} failed: {}", id, e);
        }

        self.docker
            .remove_container(
                id,
                Some(bollard::container::RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;

        info!("Removed container: {}", id);
        Ok(())
    }
}
