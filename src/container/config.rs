//! Configuration record accumulated by [`ContainerBuilder`](super::ContainerBuilder).
//!
//! The record is plain data: setters on the builder merge into it, and the
//! launch plan translates it into a runtime request when the builder starts.

use super::Network;
use crate::error::{Error, Result};
use crate::wait::WaitStrategy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Transport protocol of an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

/// A container port to publish on a host-assigned port.
///
/// Only constructible through [`ExposedPort::new`], so the port number is
/// always within 1-65535.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ExposedPort {
    port: u16,
    protocol: Protocol,
}

impl ExposedPort {
    /// Validate a port number.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidPort` configuration error for 0 or anything above 65535.
    pub fn new(port: u32, protocol: Protocol) -> Result<Self> {
        match u16::try_from(port) {
            Ok(port) if port != 0 => Ok(Self { port, protocol }),
            _ => Err(Error::invalid_port(i64::from(port))),
        }
    }

    pub fn tcp(port: u32) -> Result<Self> {
        Self::new(port, Protocol::Tcp)
    }

    /// Parse `"8080"`, `"8080/tcp"` or `"53/udp"`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (number, protocol) = match spec.split_once('/') {
            Some((number, "tcp")) => (number, Protocol::Tcp),
            Some((number, "udp")) => (number, Protocol::Udp),
            Some((number, "sctp")) => (number, Protocol::Sctp),
            Some((_, other)) => {
                return Err(Error::invalid_value(
                    "exposed_ports",
                    "protocol must be tcp, udp or sctp",
                    other,
                ));
            }
            None => (spec, Protocol::Tcp),
        };
        let port: i64 = number
            .trim()
            .parse()
            .map_err(|_| Error::invalid_value("exposed_ports", "port must be numeric", spec))?;
        let port = u32::try_from(port).map_err(|_| Error::invalid_port(port))?;
        Self::new(port, protocol)
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }
}

impl fmt::Display for ExposedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol.as_str())
    }
}

/// When to pull the image before creating the container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    /// Pull only when the image is not present locally.
    #[default]
    Missing,
    Always,
    /// Never pull; a missing image is an error.
    Never,
}

impl PullPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            PullPolicy::Missing => "missing",
            PullPolicy::Always => "always",
            PullPolicy::Never => "never",
        }
    }
}

/// Resource limits applied to the container's host config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceLimits {
    /// Memory limit in bytes
    pub memory_bytes: Option<i64>,
    /// Memory + swap limit in bytes
    pub memory_swap_bytes: Option<i64>,
    /// CPU limit in units of 10^-9 CPUs
    pub nano_cpus: Option<i64>,
    /// Relative CPU weight
    pub cpu_shares: Option<i64>,
}

impl ResourceLimits {
    /// Overlay the populated fields of `other` onto `self`.
    pub fn merge(&mut self, other: ResourceLimits) {
        if other.memory_bytes.is_some() {
            self.memory_bytes = other.memory_bytes;
        }
        if other.memory_swap_bytes.is_some() {
            self.memory_swap_bytes = other.memory_swap_bytes;
        }
        if other.nano_cpus.is_some() {
            self.nano_cpus = other.nano_cpus;
        }
        if other.cpu_shares.is_some() {
            self.cpu_shares = other.cpu_shares;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ResourceLimits::default()
    }
}

/// A host file or directory copied into the container before it starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyToContainer {
    pub source: PathBuf,
    pub target: String,
}

impl CopyToContainer {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Network the container should join.
///
/// Only a live [`Network`] can be joined. A bare name is accepted for
/// compatibility but is not applied.
#[derive(Debug, Clone)]
pub enum NetworkRef {
    Handle(Network),
    Name(String),
}

impl From<Network> for NetworkRef {
    fn from(network: Network) -> Self {
        NetworkRef::Handle(network)
    }
}

impl From<&Network> for NetworkRef {
    fn from(network: &Network) -> Self {
        NetworkRef::Handle(network.clone())
    }
}

impl From<&str> for NetworkRef {
    fn from(name: &str) -> Self {
        NetworkRef::Name(name.to_string())
    }
}

impl From<String> for NetworkRef {
    fn from(name: String) -> Self {
        NetworkRef::Name(name)
    }
}

/// Instructions for building the container image instead of pulling one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildSpec {
    pub context: PathBuf,
    /// Dockerfile path relative to the context (defaults to `Dockerfile`)
    pub dockerfile: Option<PathBuf>,
    pub build_args: BTreeMap<String, String>,
    pub target: Option<String>,
    pub platform: Option<String>,
    pub tag: Option<String>,
}

impl BuildSpec {
    pub fn new(context: impl Into<PathBuf>) -> Self {
        Self {
            context: context.into(),
            ..Default::default()
        }
    }

    pub fn dockerfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.dockerfile = Some(path.into());
        self
    }

    pub fn build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.insert(key.into(), value.into());
        self
    }

    pub fn target(mut self, stage: impl Into<String>) -> Self {
        self.target = Some(stage.into());
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Resolved Dockerfile location on the host.
    pub fn dockerfile_path(&self) -> PathBuf {
        let relative = self
            .dockerfile
            .as_deref()
            .unwrap_or_else(|| Path::new("Dockerfile"));
        self.context.join(relative)
    }
}

/// Where the container image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Reference(String),
    Build(BuildSpec),
}

/// Everything a builder has accumulated apart from the image.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    pub name: Option<String>,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub resources: ResourceLimits,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub privileged: bool,
    pub copy_to_container: Vec<CopyToContainer>,
    pub network: Option<NetworkRef>,
    pub exposed_ports: Vec<ExposedPort>,
    pub wait_strategy: Option<WaitStrategy>,
    pub pull_policy: PullPolicy,
    pub reuse: bool,
    pub startup_timeout: Option<Duration>,
}
