//! Live handle to a container the runtime has started.

use super::{ExecConfig, ExecOutput, ExposedPort};
use crate::error::{Error, Result};
use crate::runtime::{ContainerRuntime, HealthStatus, LogLine};
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Stream of log lines with failures already classified.
pub type ContainerLogs = BoxStream<'static, Result<LogLine>>;

/// A started container and the runtime that owns it.
///
/// Cheap to clone; every clone refers to the same container.
#[derive(Clone)]
pub struct StartedContainer {
    id: String,
    name: String,
    image: Option<String>,
    host: String,
    started_at: DateTime<Utc>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl StartedContainer {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        image: Option<String>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image,
            host: runtime.host(),
            started_at: Utc::now(),
            runtime,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Short form of the id, as printed by `docker ps`.
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    fn annotate(&self, err: Error) -> Error {
        let err = err.with_container_name(&self.name);
        match &self.image {
            Some(image) => err.with_image(image),
            None => err,
        }
    }

    /// Host port published for `port`.
    ///
    /// # Errors
    ///
    /// Returns a port binding error when the port has no host mapping.
    pub async fn mapped_port(&self, port: ExposedPort) -> Result<u16> {
        match self.runtime.mapped_port(&self.id, port).await {
            Ok(Some(host_port)) => Ok(host_port),
            Ok(None) => Err(self.annotate(Error::port_binding(u32::from(port.port())))),
            Err(e) => Err(self.annotate(Error::port_binding(u32::from(port.port())).with_source(e))),
        }
    }

    /// Run a command; a non-zero exit code is reported in the output, not as an error.
    ///
    /// # Errors
    ///
    /// Returns an execution error when the runtime cannot run the command, or
    /// an exec timeout when the configured timeout elapses.
    pub async fn exec(&self, config: &ExecConfig) -> Result<ExecOutput> {
        debug!("Executing in {}: {:?}", self.name, config.cmd());
        let run = self.runtime.exec(&self.id, config);

        let result = match config.timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, run).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(
                        self.annotate(Error::exec_timeout(config.cmd().to_vec(), timeout))
                    );
                }
            },
            None => run.await,
        };

        result.map_err(|e| {
            self.annotate(
                Error::execution(
                    config.cmd().to_vec(),
                    format!("failed to execute `{}`", config.cmd().join(" ")),
                )
                .with_source(e),
            )
        })
    }

    /// Like [`StartedContainer::exec`] but a non-zero exit code is an error.
    pub async fn exec_checked(&self, config: &ExecConfig) -> Result<ExecOutput> {
        let output = self.exec(config).await?;
        if output.success() {
            return Ok(output);
        }
        Err(self.annotate(Error::command_failed(
            config.cmd().to_vec(),
            output.exit_code,
            output.stdout,
            output.stderr,
        )))
    }

    /// Everything the container has logged so far.
    pub async fn logs(&self) -> Result<String> {
        self.runtime.logs(&self.id).await.map_err(|e| {
            self.annotate(
                Error::container("failed to read container logs")
                    .with_operation("logs")
                    .with_source(e),
            )
        })
    }

    /// Follow the container's output.
    pub fn log_stream(&self) -> ContainerLogs {
        let name = self.name.clone();
        self.runtime
            .log_stream(&self.id, true)
            .map(move |line| {
                line.map_err(|e| {
                    Error::container("failed to read container logs")
                        .with_container_name(name.clone())
                        .with_operation("logs")
                        .with_source(e)
                })
            })
            .boxed()
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.runtime.health(&self.id).await.map_err(|e| {
            self.annotate(
                Error::container("failed to inspect container health")
                    .with_operation("health")
                    .with_source(e),
            )
        })
    }

    pub async fn is_running(&self) -> Result<bool> {
        self.runtime.is_running(&self.id).await.map_err(|e| {
            self.annotate(
                Error::container("failed to inspect container state")
                    .with_operation("inspect")
                    .with_source(e),
            )
        })
    }

    pub async fn restart(&self) -> Result<()> {
        info!("Restarting container {} ({})", self.name, self.short_id());
        self.runtime.restart_container(&self.id).await.map_err(|e| {
            self.annotate(
                Error::start_failed("failed to restart container")
                    .with_operation("restart")
                    .with_container_id(&self.id)
                    .with_source(e),
            )
        })
    }

    /// Address of the container on `network`.
    ///
    /// # Errors
    ///
    /// Returns a network-not-found error when the container is not attached.
    pub async fn ip_address(&self, network: &str) -> Result<String> {
        match self.runtime.ip_address(&self.id, network).await {
            Ok(Some(ip)) => Ok(ip),
            Ok(None) => Err(self.annotate(Error::network_not_found(network))),
            Err(e) => Err(self.annotate(Error::network_not_found(network).with_source(e))),
        }
    }

    /// Stop and remove the container.
    pub async fn remove(&self) -> Result<()> {
        info!("Removing container {} ({})", self.name, self.short_id());
        self.runtime.remove_container(&self.id).await.map_err(|e| {
            self.annotate(
                Error::cleanup_failed(format!("failed to remove container {}", self.name))
                    .with_container_id(&self.id)
                    .with_source(e),
            )
        })
    }
}

impl fmt::Debug for StartedContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartedContainer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("image", &self.image)
            .field("host", &self.host)
            .field("started_at", &self.started_at)
            .finish()
    }
}
