//! Container runtime seam.
//!
//! Builders never talk to Docker directly. They issue calls against
//! [`ContainerRuntime`], which is implemented by:
//!
//! - [`DockerRuntime`]: bollard client plus the docker CLI for image builds and
//!   file copies (feature `docker`)
//! - [`RecordingRuntime`]: an in-memory runtime that records every call and can
//!   be scripted to fail, for tests that must run without a daemon
//!
//! Implementations report failures as `anyhow::Error`; callers rewrap them
//! into the crate's error taxonomy at the point of delegation.

#[cfg(feature = "docker")]
pub mod docker;
mod recording;

#[cfg(feature = "docker")]
pub use docker::DockerRuntime;
pub use recording::{RecordingRuntime, RuntimeCall, RuntimeOp};

use crate::container::{
    BuildSpec, ContainerRequest, CopyToContainer, ExecConfig, ExecOutput, ExposedPort,
};
use crate::error::Result;
use crate::settings::Settings;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Result of a runtime call.
pub type RuntimeResult<T> = anyhow::Result<T>;

/// Stream of log lines from a container.
pub type LogStream = BoxStream<'static, RuntimeResult<LogLine>>;

/// One chunk of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    Stdout(String),
    Stderr(String),
}

impl LogLine {
    pub fn text(&self) -> &str {
        match self {
            LogLine::Stdout(text) | LogLine::Stderr(text) => text,
        }
    }
}

/// Health as reported by the container's own healthcheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Starting,
    /// The image defines no healthcheck.
    NotConfigured,
}

/// Structured reason for an image build failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildFailureReason {
    /// A base image could not be pulled.
    PullFailed,
    /// The Dockerfile or a file it references does not exist.
    FileNotFound,
    /// The Dockerfile could not be parsed.
    Syntax,
    Other,
}

/// Failure reported by [`ContainerRuntime::build_image`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("image build failed: {message}")]
pub struct BuildFailure {
    pub reason: BuildFailureReason,
    pub message: String,
}

impl BuildFailure {
    pub fn new(reason: BuildFailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// A container already known to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub running: bool,
}

/// Operations the builders delegate to an external container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Host on which published ports are reachable.
    fn host(&self) -> String;

    /// Daemon address, when known.
    fn docker_host(&self) -> Option<String> {
        None
    }

    async fn image_exists(&self, image: &str) -> RuntimeResult<bool>;

    async fn pull_image(&self, image: &str) -> RuntimeResult<()>;

    /// Build `spec` and tag the result as `tag`.
    async fn build_image(&self, spec: &BuildSpec, tag: &str) -> Result<(), BuildFailure>;

    /// Find a container carrying every label in `labels`.
    async fn find_container(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> RuntimeResult<Option<ContainerSummary>>;

    /// Create (but do not start) a container, returning its id.
    async fn create_container(&self, request: &ContainerRequest) -> RuntimeResult<String>;

    async fn copy_to_container(&self, id: &str, copy: &CopyToContainer) -> RuntimeResult<()>;

    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    async fn is_running(&self, id: &str) -> RuntimeResult<bool>;

    /// Host port bound to `port`, `None` when it was not published.
    async fn mapped_port(&self, id: &str, port: ExposedPort) -> RuntimeResult<Option<u16>>;

    async fn exec(&self, id: &str, config: &ExecConfig) -> RuntimeResult<ExecOutput>;

    /// Everything the container has written so far.
    async fn logs(&self, id: &str) -> RuntimeResult<String>;

    fn log_stream(&self, id: &str, follow: bool) -> LogStream;

    async fn health(&self, id: &str) -> RuntimeResult<HealthStatus>;

    async fn restart_container(&self, id: &str) -> RuntimeResult<()>;

    /// Address of the container on `network`, `None` when not attached.
    async fn ip_address(&self, id: &str, network: &str) -> RuntimeResult<Option<String>>;

    /// Create a network, returning its id.
    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> RuntimeResult<String>;

    async fn remove_network(&self, id: &str) -> RuntimeResult<()>;

    /// Stop and remove a container together with its anonymous volumes.
    async fn remove_container(&self, id: &str) -> RuntimeResult<()>;
}

impl fmt::Debug for dyn ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerRuntime")
            .field("host", &self.host())
            .finish()
    }
}

/// Runtime used when a builder was not given one explicitly.
///
/// # Errors
///
/// Returns a daemon error when Docker cannot be reached, or a configuration
/// error when the crate was built without the `docker` feature.
pub async fn connect_default(settings: &Settings) -> Result<Arc<dyn ContainerRuntime>> {
    #[cfg(feature = "docker")]
    {
        let runtime = DockerRuntime::connect(settings).await?;
        Ok(Arc::new(runtime))
    }

    #[cfg(not(feature = "docker"))]
    {
        let _ = settings;
        Err(crate::error::Error::missing_configuration(
            "runtime",
            "no container runtime configured; enable the `docker` feature or pass one with `with_runtime`",
        ))
    }
}
