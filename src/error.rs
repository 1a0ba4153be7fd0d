//! Error taxonomy shared by every builder and service.
//!
//! Every failure is an [`Error`] carrying:
//!
//! - a human readable message,
//! - the root context every kind shares (`container_name`, `image`, `operation`),
//! - a [`Cause`] sum type whose branch and leaf variants carry the fields
//!   declared for that kind,
//! - an optional source: either a `parent` [`Error`] (a wrapped lower level
//!   failure of any kind) or a raw failure that came from outside the crate.
//!
//! Kinds form a tree described by [`ErrorKind::parent`]. Membership tests walk
//! that metadata, so `err.is(ErrorKind::Lifecycle)` holds for a
//! [`ErrorKind::NotStarted`] error while `err.is(ErrorKind::Network)` does not.
//!
//! ```
//! use testenv::error::{Error, ErrorKind};
//!
//! let binding = Error::port_binding(5432).with_container_name("db");
//! let err = Error::start_failed("container never came up").with_parent(binding);
//!
//! assert!(err.is(ErrorKind::StartFailed));
//! assert!(err.is(ErrorKind::Lifecycle));
//! assert!(err.find(ErrorKind::PortBinding).is_some());
//! assert_eq!(err.chain().len(), 2);
//! ```

use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::{Map, Value};
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Result type for every fallible operation in the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Raw failure coming from outside the taxonomy.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Every error kind, branches and leaves alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum ErrorKind {
    /// Root of the tree.
    Container,

    Configuration,
    InvalidPort,
    InvalidImage,
    MissingConfiguration,
    InvalidEnvironment,

    Lifecycle,
    NotStarted,
    AlreadyStarted,
    StartFailed,
    StartupTimeout,
    CleanupFailed,

    Daemon,
    DaemonUnavailable,
    DaemonPermissionDenied,

    Image,
    ImagePullFailed,
    ImageNotFound,
    ImageBuildFailed,
    DockerfileNotFound,
    DockerfileSyntax,

    Network,
    PortBinding,
    NetworkNotFound,
    NetworkCreateFailed,

    Compose,
    ComposeStartFailed,
    ComposeStopFailed,
    ServiceNotFound,

    Execution,
    CommandFailed,
    ExecTimeout,

    Filesystem,
    CopyFailed,
    FileNotFound,

    Validation,
    InvalidValue,
}

impl ErrorKind {
    /// All kinds, root first, each branch followed by its leaves.
    pub const ALL: [ErrorKind; 37] = [
        ErrorKind::Container,
        ErrorKind::Configuration,
        ErrorKind::InvalidPort,
        ErrorKind::InvalidImage,
        ErrorKind::MissingConfiguration,
        ErrorKind::InvalidEnvironment,
        ErrorKind::Lifecycle,
        ErrorKind::NotStarted,
        ErrorKind::AlreadyStarted,
        ErrorKind::StartFailed,
        ErrorKind::StartupTimeout,
        ErrorKind::CleanupFailed,
        ErrorKind::Daemon,
        ErrorKind::DaemonUnavailable,
        ErrorKind::DaemonPermissionDenied,
        ErrorKind::Image,
        ErrorKind::ImagePullFailed,
        ErrorKind::ImageNotFound,
        ErrorKind::ImageBuildFailed,
        ErrorKind::DockerfileNotFound,
        ErrorKind::DockerfileSyntax,
        ErrorKind::Network,
        ErrorKind::PortBinding,
        ErrorKind::NetworkNotFound,
        ErrorKind::NetworkCreateFailed,
        ErrorKind::Compose,
        ErrorKind::ComposeStartFailed,
        ErrorKind::ComposeStopFailed,
        ErrorKind::ServiceNotFound,
        ErrorKind::Execution,
        ErrorKind::CommandFailed,
        ErrorKind::ExecTimeout,
        ErrorKind::Filesystem,
        ErrorKind::CopyFailed,
        ErrorKind::FileNotFound,
        ErrorKind::Validation,
        ErrorKind::InvalidValue,
    ];

    /// The kind this one extends, `None` for the root.
    pub const fn parent(self) -> Option<ErrorKind> {
        use ErrorKind::*;
        match self {
            Container => None,
            Configuration | Lifecycle | Daemon | Image | Network | Compose | Execution
            | Filesystem | Validation => Some(Container),
            InvalidPort | InvalidImage | MissingConfiguration | InvalidEnvironment => {
                Some(Configuration)
            }
            NotStarted | AlreadyStarted | StartFailed | StartupTimeout | CleanupFailed => {
                Some(Lifecycle)
            }
            DaemonUnavailable | DaemonPermissionDenied => Some(Daemon),
            ImagePullFailed | ImageNotFound | ImageBuildFailed | DockerfileNotFound
            | DockerfileSyntax => Some(Image),
            PortBinding | NetworkNotFound | NetworkCreateFailed => Some(Network),
            ComposeStartFailed | ComposeStopFailed | ServiceNotFound => Some(Compose),
            CommandFailed | ExecTimeout => Some(Execution),
            CopyFailed | FileNotFound => Some(Filesystem),
            InvalidValue => Some(Validation),
        }
    }

    /// Ancestors of this kind, nearest first, ending at [`ErrorKind::Container`].
    pub fn ancestors(self) -> Vec<ErrorKind> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(kind) = current {
            out.push(kind);
            current = kind.parent();
        }
        out
    }

    /// True when `self` is `other` or one of its descendants.
    pub fn is_a(self, other: ErrorKind) -> bool {
        self == other || self.ancestors().contains(&other)
    }

    /// Stable kind name used in serialized errors.
    pub const fn name(self) -> &'static str {
        use ErrorKind::*;
        match self {
            Container => "ContainerError",
            Configuration => "ConfigurationError",
            InvalidPort => "InvalidPortError",
            InvalidImage => "InvalidImageError",
            MissingConfiguration => "MissingConfigurationError",
            InvalidEnvironment => "InvalidEnvironmentError",
            Lifecycle => "LifecycleError",
            NotStarted => "NotStartedError",
            AlreadyStarted => "AlreadyStartedError",
            StartFailed => "StartFailedError",
            StartupTimeout => "StartupTimeoutError",
            CleanupFailed => "CleanupFailedError",
            Daemon => "DaemonError",
            DaemonUnavailable => "DaemonUnavailableError",
            DaemonPermissionDenied => "DaemonPermissionDeniedError",
            Image => "ImageError",
            ImagePullFailed => "ImagePullError",
            ImageNotFound => "ImageNotFoundError",
            ImageBuildFailed => "ImageBuildError",
            DockerfileNotFound => "DockerfileNotFoundError",
            DockerfileSyntax => "DockerfileSyntaxError",
            Network => "NetworkError",
            PortBinding => "PortBindingError",
            NetworkNotFound => "NetworkNotFoundError",
            NetworkCreateFailed => "NetworkCreateError",
            Compose => "ComposeError",
            ComposeStartFailed => "ComposeStartError",
            ComposeStopFailed => "ComposeStopError",
            ServiceNotFound => "ServiceNotFoundError",
            Execution => "ExecutionError",
            CommandFailed => "CommandFailedError",
            ExecTimeout => "ExecTimeoutError",
            Filesystem => "FilesystemError",
            CopyFailed => "CopyFailedError",
            FileNotFound => "FileNotFoundError",
            Validation => "ValidationError",
            InvalidValue => "InvalidValueError",
        }
    }

    /// Message used when an error is built with an empty message.
    pub const fn default_message(self) -> &'static str {
        use ErrorKind::*;
        match self {
            Container => "container operation failed",
            Configuration => "invalid container configuration",
            InvalidPort => "port must be between 1 and 65535",
            InvalidImage => "invalid image reference",
            MissingConfiguration => "required configuration is missing",
            InvalidEnvironment => "invalid environment variable",
            Lifecycle => "invalid container lifecycle transition",
            NotStarted => "container has not been started",
            AlreadyStarted => "container has already been started",
            StartFailed => "container failed to start",
            StartupTimeout => "container did not become ready in time",
            CleanupFailed => "container cleanup failed",
            Daemon => "container daemon error",
            DaemonUnavailable => "container daemon is not reachable",
            DaemonPermissionDenied => "permission denied talking to the container daemon",
            Image => "image error",
            ImagePullFailed => "failed to pull image",
            ImageNotFound => "image not found",
            ImageBuildFailed => "failed to build image",
            DockerfileNotFound => "dockerfile not found",
            DockerfileSyntax => "dockerfile could not be parsed",
            Network => "network error",
            PortBinding => "exposed port has no host mapping",
            NetworkNotFound => "network not found",
            NetworkCreateFailed => "failed to create network",
            Compose => "compose environment error",
            ComposeStartFailed => "compose environment failed to start",
            ComposeStopFailed => "compose environment failed to stop",
            ServiceNotFound => "service not found in compose environment",
            Execution => "command execution failed",
            CommandFailed => "command exited unsuccessfully",
            ExecTimeout => "command timed out",
            Filesystem => "filesystem error",
            CopyFailed => "failed to copy file into container",
            FileNotFound => "file not found",
            Validation => "validation failed",
            InvalidValue => "invalid value",
        }
    }

    /// Fields this kind adds on top of its parent.
    pub const fn own_fields(self) -> &'static [&'static str] {
        use ErrorKind::*;
        match self {
            Container => &["container_name", "image", "operation"],
            Configuration => &["field"],
            InvalidPort => &["port"],
            InvalidImage => &["reference"],
            InvalidEnvironment => &["key"],
            Lifecycle => &["current_state", "expected_state", "container_id"],
            StartupTimeout => &["timeout_ms"],
            Daemon => &["docker_host"],
            Image => &["image_name"],
            ImagePullFailed => &["registry"],
            ImageBuildFailed => &["context_path"],
            DockerfileNotFound | DockerfileSyntax => &["dockerfile"],
            Network => &["network_name"],
            PortBinding => &["port"],
            Compose => &["compose_path", "compose_file"],
            ServiceNotFound => &["service_name", "available_services"],
            Execution => &["command", "exit_code"],
            CommandFailed => &["stdout", "stderr"],
            ExecTimeout => &["timeout_ms"],
            Filesystem => &["path"],
            CopyFailed => &["destination"],
            Validation => &["field", "constraint"],
            InvalidValue => &["value"],
            MissingConfiguration | NotStarted | AlreadyStarted | StartFailed | CleanupFailed
            | DaemonUnavailable | DaemonPermissionDenied | ImageNotFound | NetworkNotFound
            | NetworkCreateFailed | ComposeStartFailed | ComposeStopFailed | FileNotFound => &[],
        }
    }

    /// Every field an error of this kind carries, root fields first.
    pub fn declared_fields(self) -> Vec<&'static str> {
        let mut lineage = self.ancestors();
        lineage.reverse();
        lineage.push(self);
        lineage
            .into_iter()
            .flat_map(|kind| kind.own_fields().iter().copied())
            .collect()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Context shared by every error kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerContext {
    pub container_name: Option<String>,
    pub image: Option<String>,
    pub operation: Option<String>,
}

/// Branch specific context.
#[derive(Debug, Clone, PartialEq)]
pub enum Cause {
    Container,
    Configuration(ConfigurationCause),
    Lifecycle(LifecycleCause),
    Daemon(DaemonCause),
    Image(ImageCause),
    Network(NetworkCause),
    Compose(ComposeCause),
    Execution(ExecutionCause),
    Filesystem(FilesystemCause),
    Validation(ValidationCause),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationCause {
    pub field: Option<String>,
    pub reason: ConfigurationReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConfigurationReason {
    #[default]
    General,
    InvalidPort {
        port: i64,
    },
    InvalidImage {
        reference: String,
    },
    Missing,
    InvalidEnvironment {
        key: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleCause {
    pub current_state: Option<String>,
    pub expected_state: Option<String>,
    pub container_id: Option<String>,
    pub reason: LifecycleReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum LifecycleReason {
    #[default]
    General,
    NotStarted,
    AlreadyStarted,
    StartFailed,
    StartupTimeout {
        timeout: Duration,
    },
    CleanupFailed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DaemonCause {
    pub docker_host: Option<String>,
    pub reason: DaemonReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum DaemonReason {
    #[default]
    General,
    Unavailable,
    PermissionDenied,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageCause {
    pub image_name: Option<String>,
    pub reason: ImageReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ImageReason {
    #[default]
    General,
    PullFailed {
        registry: Option<String>,
    },
    NotFound,
    BuildFailed {
        context_path: Option<PathBuf>,
    },
    DockerfileNotFound {
        dockerfile: Option<PathBuf>,
    },
    DockerfileSyntax {
        dockerfile: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkCause {
    pub network_name: Option<String>,
    pub reason: NetworkReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum NetworkReason {
    #[default]
    General,
    PortBinding {
        port: u32,
    },
    NotFound,
    CreateFailed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposeCause {
    pub compose_path: Option<PathBuf>,
    pub compose_file: Option<String>,
    pub reason: ComposeReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ComposeReason {
    #[default]
    General,
    StartFailed,
    StopFailed,
    ServiceNotFound {
        service_name: String,
        available_services: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionCause {
    pub command: Vec<String>,
    pub exit_code: Option<i64>,
    pub reason: ExecutionReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ExecutionReason {
    #[default]
    General,
    CommandFailed {
        stdout: String,
        stderr: String,
    },
    Timeout {
        timeout: Duration,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilesystemCause {
    pub path: Option<PathBuf>,
    pub reason: FilesystemReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum FilesystemReason {
    #[default]
    General,
    CopyFailed {
        destination: String,
    },
    FileNotFound,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationCause {
    pub field: Option<String>,
    pub constraint: Option<String>,
    pub reason: ValidationReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ValidationReason {
    #[default]
    General,
    InvalidValue {
        value: String,
    },
}

macro_rules! impl_cause_from {
    ($($variant:ident => $cause:ident, $reason:ident;)*) => {
        $(
            impl From<$cause> for Cause {
                fn from(cause: $cause) -> Self {
                    Cause::$variant(cause)
                }
            }

            impl From<$reason> for $cause {
                fn from(reason: $reason) -> Self {
                    $cause {
                        reason,
                        ..Default::default()
                    }
                }
            }

            impl From<$reason> for Cause {
                fn from(reason: $reason) -> Self {
                    Cause::$variant($cause::from(reason))
                }
            }
        )*
    };
}

impl_cause_from! {
    Configuration => ConfigurationCause, ConfigurationReason;
    Lifecycle => LifecycleCause, LifecycleReason;
    Daemon => DaemonCause, DaemonReason;
    Image => ImageCause, ImageReason;
    Network => NetworkCause, NetworkReason;
    Compose => ComposeCause, ComposeReason;
    Execution => ExecutionCause, ExecutionReason;
    Filesystem => FilesystemCause, FilesystemReason;
    Validation => ValidationCause, ValidationReason;
}

impl Cause {
    /// Kind described by this cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Cause::Container => ErrorKind::Container,
            Cause::Configuration(c) => match c.reason {
                ConfigurationReason::General => ErrorKind::Configuration,
                ConfigurationReason::InvalidPort { .. } => ErrorKind::InvalidPort,
                ConfigurationReason::InvalidImage { .. } => ErrorKind::InvalidImage,
                ConfigurationReason::Missing => ErrorKind::MissingConfiguration,
                ConfigurationReason::InvalidEnvironment { .. } => ErrorKind::InvalidEnvironment,
            },
            Cause::Lifecycle(c) => match c.reason {
                LifecycleReason::General => ErrorKind::Lifecycle,
                LifecycleReason::NotStarted => ErrorKind::NotStarted,
                LifecycleReason::AlreadyStarted => ErrorKind::AlreadyStarted,
                LifecycleReason::StartFailed => ErrorKind::StartFailed,
                LifecycleReason::StartupTimeout { .. } => ErrorKind::StartupTimeout,
                LifecycleReason::CleanupFailed => ErrorKind::CleanupFailed,
            },
            Cause::Daemon(c) => match c.reason {
                DaemonReason::General => ErrorKind::Daemon,
                DaemonReason::Unavailable => ErrorKind::DaemonUnavailable,
                DaemonReason::PermissionDenied => ErrorKind::DaemonPermissionDenied,
            },
            Cause::Image(c) => match c.reason {
                ImageReason::General => ErrorKind::Image,
                ImageReason::PullFailed { .. } => ErrorKind::ImagePullFailed,
                ImageReason::NotFound => ErrorKind::ImageNotFound,
                ImageReason::BuildFailed { .. } => ErrorKind::ImageBuildFailed,
                ImageReason::DockerfileNotFound { .. } => ErrorKind::DockerfileNotFound,
                ImageReason::DockerfileSyntax { .. } => ErrorKind::DockerfileSyntax,
            },
            Cause::Network(c) => match c.reason {
                NetworkReason::General => ErrorKind::Network,
                NetworkReason::PortBinding { .. } => ErrorKind::PortBinding,
                NetworkReason::NotFound => ErrorKind::NetworkNotFound,
                NetworkReason::CreateFailed => ErrorKind::NetworkCreateFailed,
            },
            Cause::Compose(c) => match c.reason {
                ComposeReason::General => ErrorKind::Compose,
                ComposeReason::StartFailed => ErrorKind::ComposeStartFailed,
                ComposeReason::StopFailed => ErrorKind::ComposeStopFailed,
                ComposeReason::ServiceNotFound { .. } => ErrorKind::ServiceNotFound,
            },
            Cause::Execution(c) => match c.reason {
                ExecutionReason::General => ErrorKind::Execution,
                ExecutionReason::CommandFailed { .. } => ErrorKind::CommandFailed,
                ExecutionReason::Timeout { .. } => ErrorKind::ExecTimeout,
            },
            Cause::Filesystem(c) => match c.reason {
                FilesystemReason::General => ErrorKind::Filesystem,
                FilesystemReason::CopyFailed { .. } => ErrorKind::CopyFailed,
                FilesystemReason::FileNotFound => ErrorKind::FileNotFound,
            },
            Cause::Validation(c) => match c.reason {
                ValidationReason::General => ErrorKind::Validation,
                ValidationReason::InvalidValue { .. } => ErrorKind::InvalidValue,
            },
        }
    }

    fn write_fields(&self, map: &mut Map<String, Value>) {
        match self {
            Cause::Container => {}
            Cause::Configuration(c) => {
                map.insert("field".into(), Value::from(c.field.clone()));
                match &c.reason {
                    ConfigurationReason::InvalidPort { port } => {
                        map.insert("port".into(), Value::from(*port));
                    }
                    ConfigurationReason::InvalidImage { reference } => {
                        map.insert("reference".into(), Value::from(reference.clone()));
                    }
                    ConfigurationReason::InvalidEnvironment { key } => {
                        map.insert("key".into(), Value::from(key.clone()));
                    }
                    ConfigurationReason::General | ConfigurationReason::Missing => {}
                }
            }
            Cause::Lifecycle(c) => {
                map.insert("current_state".into(), Value::from(c.current_state.clone()));
                map.insert("expected_state".into(), Value::from(c.expected_state.clone()));
                map.insert("container_id".into(), Value::from(c.container_id.clone()));
                if let LifecycleReason::StartupTimeout { timeout } = c.reason {
                    map.insert("timeout_ms".into(), duration_ms(timeout));
                }
            }
            Cause::Daemon(c) => {
                map.insert("docker_host".into(), Value::from(c.docker_host.clone()));
            }
            Cause::Image(c) => {
                map.insert("image_name".into(), Value::from(c.image_name.clone()));
                match &c.reason {
                    ImageReason::PullFailed { registry } => {
                        map.insert("registry".into(), Value::from(registry.clone()));
                    }
                    ImageReason::BuildFailed { context_path } => {
                        map.insert("context_path".into(), path_value(context_path.as_ref()));
                    }
                    ImageReason::DockerfileNotFound { dockerfile }
                    | ImageReason::DockerfileSyntax { dockerfile } => {
                        map.insert("dockerfile".into(), path_value(dockerfile.as_ref()));
                    }
                    ImageReason::General | ImageReason::NotFound => {}
                }
            }
            Cause::Network(c) => {
                map.insert("network_name".into(), Value::from(c.network_name.clone()));
                if let NetworkReason::PortBinding { port } = c.reason {
                    map.insert("port".into(), Value::from(port));
                }
            }
            Cause::Compose(c) => {
                map.insert("compose_path".into(), path_value(c.compose_path.as_ref()));
                map.insert("compose_file".into(), Value::from(c.compose_file.clone()));
                if let ComposeReason::ServiceNotFound {
                    service_name,
                    available_services,
                } = &c.reason
                {
                    map.insert("service_name".into(), Value::from(service_name.clone()));
                    map.insert(
                        "available_services".into(),
                        Value::from(available_services.clone()),
                    );
                }
            }
            Cause::Execution(c) => {
                map.insert("command".into(), Value::from(c.command.clone()));
                map.insert("exit_code".into(), Value::from(c.exit_code));
                match &c.reason {
                    ExecutionReason::CommandFailed { stdout, stderr } => {
                        map.insert("stdout".into(), Value::from(stdout.clone()));
                        map.insert("stderr".into(), Value::from(stderr.clone()));
                    }
                    ExecutionReason::Timeout { timeout } => {
                        map.insert("timeout_ms".into(), duration_ms(*timeout));
                    }
                    ExecutionReason::General => {}
                }
            }
            Cause::Filesystem(c) => {
                map.insert("path".into(), path_value(c.path.as_ref()));
                if let FilesystemReason::CopyFailed { destination } = &c.reason {
                    map.insert("destination".into(), Value::from(destination.clone()));
                }
            }
            Cause::Validation(c) => {
                map.insert("field".into(), Value::from(c.field.clone()));
                map.insert("constraint".into(), Value::from(c.constraint.clone()));
                if let ValidationReason::InvalidValue { value } = &c.reason {
                    map.insert("value".into(), Value::from(value.clone()));
                }
            }
        }
    }
}

fn duration_ms(duration: Duration) -> Value {
    Value::from(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

fn path_value(path: Option<&PathBuf>) -> Value {
    path.map(|p| Value::from(p.display().to_string()))
        .unwrap_or(Value::Null)
}

/// A classified failure with structured context and an optional parent.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    message: String,
    context: ContainerContext,
    cause: Cause,
    /// Either a wrapped parent [`Error`] or a raw external failure.
    #[source]
    source: Option<BoxError>,
}

impl Error {
    /// Build an error from a message and a branch or leaf cause.
    ///
    /// An empty message falls back to the kind's default message.
    pub fn new(message: impl Into<String>, cause: impl Into<Cause>) -> Self {
        let cause = cause.into();
        let mut message = message.into();
        if message.is_empty() {
            message = cause.kind().default_message().to_string();
        }
        Self {
            message,
            context: ContainerContext::default(),
            cause,
            source: None,
        }
    }

    /// Generic root-kind error.
    pub fn container(message: impl Into<String>) -> Self {
        Self::new(message, Cause::Container)
    }

    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            message,
            ConfigurationCause {
                field: Some(field.into()),
                reason: ConfigurationReason::General,
            },
        )
    }

    pub fn invalid_port(port: i64) -> Self {
        Self::new(
            format!("port {port} is outside the range 1-65535"),
            ConfigurationCause {
                field: Some("exposed_ports".into()),
                reason: ConfigurationReason::InvalidPort { port },
            },
        )
    }

    pub fn invalid_image(reference: impl Into<String>, message: impl Into<String>) -> Self {
        let reference = reference.into();
        Self::new(
            message,
            ConfigurationCause {
                field: Some("image".into()),
                reason: ConfigurationReason::InvalidImage {
                    reference: reference.clone(),
                },
            },
        )
        .with_image(reference)
    }

    pub fn missing_configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            message,
            ConfigurationCause {
                field: Some(field.into()),
                reason: ConfigurationReason::Missing,
            },
        )
    }

    pub fn invalid_environment(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            message,
            ConfigurationCause {
                field: Some("env".into()),
                reason: ConfigurationReason::InvalidEnvironment { key: key.into() },
            },
        )
    }

    /// Runtime dependent `operation` attempted before the handle was bound.
    pub fn not_started(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        Self::new(
            format!("cannot {operation}: container has not been started"),
            LifecycleCause {
                current_state: Some("uninitialized".into()),
                expected_state: Some("running".into()),
                container_id: None,
                reason: LifecycleReason::NotStarted,
            },
        )
        .with_operation(operation)
    }

    pub fn already_started(operation: impl Into<String>, current_state: &str) -> Self {
        let operation = operation.into();
        Self::new(
            format!("cannot {operation}: container is already {current_state}"),
            LifecycleCause {
                current_state: Some(current_state.to_string()),
                expected_state: Some("uninitialized".into()),
                container_id: None,
                reason: LifecycleReason::AlreadyStarted,
            },
        )
        .with_operation(operation)
    }

    pub fn start_failed(message: impl Into<String>) -> Self {
        Self::new(
            message,
            LifecycleCause {
                current_state: Some("created".into()),
                expected_state: Some("running".into()),
                container_id: None,
                reason: LifecycleReason::StartFailed,
            },
        )
        .with_operation("start")
    }

    pub fn startup_timeout(timeout: Duration) -> Self {
        Self::new(
            format!("container was not ready after {timeout:?}"),
            LifecycleCause {
                current_state: Some("starting".into()),
                expected_state: Some("ready".into()),
                container_id: None,
                reason: LifecycleReason::StartupTimeout { timeout },
            },
        )
        .with_operation("wait")
    }

    pub fn cleanup_failed(message: impl Into<String>) -> Self {
        Self::new(
            message,
            LifecycleCause {
                current_state: Some("running".into()),
                expected_state: Some("removed".into()),
                container_id: None,
                reason: LifecycleReason::CleanupFailed,
            },
        )
        .with_operation("cleanup")
    }

    pub fn daemon_unavailable(docker_host: Option<String>, message: impl Into<String>) -> Self {
        Self::new(
            message,
            DaemonCause {
                docker_host,
                reason: DaemonReason::Unavailable,
            },
        )
    }

    pub fn image_pull_failed(image: impl Into<String>, registry: Option<String>) -> Self {
        let image = image.into();
        Self::new(
            format!("failed to pull image '{image}'"),
            ImageCause {
                image_name: Some(image.clone()),
                reason: ImageReason::PullFailed { registry },
            },
        )
        .with_image(image)
    }

    pub fn image_not_found(image: impl Into<String>) -> Self {
        let image = image.into();
        Self::new(
            format!("image '{image}' is not available locally"),
            ImageCause {
                image_name: Some(image.clone()),
                reason: ImageReason::NotFound,
            },
        )
        .with_image(image)
    }

    pub fn image_build_failed(
        image: impl Into<String>,
        context_path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        let image = image.into();
        Self::new(
            message,
            ImageCause {
                image_name: Some(image.clone()),
                reason: ImageReason::BuildFailed {
                    context_path: Some(context_path.into()),
                },
            },
        )
        .with_image(image)
        .with_operation("build")
    }

    pub fn dockerfile_not_found(
        image: impl Into<String>,
        dockerfile: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        let image = image.into();
        Self::new(
            message,
            ImageCause {
                image_name: Some(image.clone()),
                reason: ImageReason::DockerfileNotFound {
                    dockerfile: Some(dockerfile.into()),
                },
            },
        )
        .with_image(image)
        .with_operation("build")
    }

    pub fn dockerfile_syntax(
        image: impl Into<String>,
        dockerfile: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        let image = image.into();
        Self::new(
            message,
            ImageCause {
                image_name: Some(image.clone()),
                reason: ImageReason::DockerfileSyntax {
                    dockerfile: Some(dockerfile.into()),
                },
            },
        )
        .with_image(image)
        .with_operation("build")
    }

    pub fn daemon_permission_denied(docker_host: Option<String>, message: impl Into<String>) -> Self {
        Self::new(
            message,
            DaemonCause {
                docker_host,
                reason: DaemonReason::PermissionDenied,
            },
        )
    }

    pub fn port_binding(port: u32) -> Self {
        Self::new(
            format!("exposed port {port} has no host mapping"),
            NetworkCause {
                network_name: None,
                reason: NetworkReason::PortBinding { port },
            },
        )
    }

    pub fn network_not_found(network: impl Into<String>) -> Self {
        let network = network.into();
        Self::new(
            format!("container is not attached to network '{network}'"),
            NetworkCause {
                network_name: Some(network),
                reason: NetworkReason::NotFound,
            },
        )
    }

    pub fn network_create_failed(network: impl Into<String>) -> Self {
        let network = network.into();
        Self::new(
            format!("failed to create network '{network}'"),
            NetworkCause {
                network_name: Some(network),
                reason: NetworkReason::CreateFailed,
            },
        )
    }

    pub fn compose(
        compose_path: impl Into<PathBuf>,
        compose_file: impl Into<String>,
        reason: ComposeReason,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            message,
            ComposeCause {
                compose_path: Some(compose_path.into()),
                compose_file: Some(compose_file.into()),
                reason,
            },
        )
    }

    pub fn service_not_found(
        compose_path: impl Into<PathBuf>,
        compose_file: impl Into<String>,
        service_name: impl Into<String>,
        available_services: Vec<String>,
    ) -> Self {
        let service_name = service_name.into();
        Self::compose(
            compose_path,
            compose_file,
            ComposeReason::ServiceNotFound {
                service_name: service_name.clone(),
                available_services: available_services.clone(),
            },
            format!(
                "service '{service_name}' not found (available: {})",
                available_services.join(", ")
            ),
        )
        .with_container_name(service_name)
    }

    pub fn execution(command: Vec<String>, message: impl Into<String>) -> Self {
        Self::new(
            message,
            ExecutionCause {
                command,
                exit_code: None,
                reason: ExecutionReason::General,
            },
        )
        .with_operation("exec")
    }

    pub fn command_failed(command: Vec<String>, exit_code: Option<i64>, stdout: String, stderr: String) -> Self {
        Self::new(
            format!("`{}` exited with code {exit_code:?}", command.join(" ")),
            ExecutionCause {
                command,
                exit_code,
                reason: ExecutionReason::CommandFailed { stdout, stderr },
            },
        )
        .with_operation("exec")
    }

    pub fn exec_timeout(command: Vec<String>, timeout: Duration) -> Self {
        Self::new(
            format!("`{}` did not finish within {timeout:?}", command.join(" ")),
            ExecutionCause {
                command,
                exit_code: None,
                reason: ExecutionReason::Timeout { timeout },
            },
        )
        .with_operation("exec")
    }

    pub fn copy_failed(source: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        let source = source.into();
        let destination = destination.into();
        Self::new(
            format!("failed to copy {} to {destination}", source.display()),
            FilesystemCause {
                path: Some(source),
                reason: FilesystemReason::CopyFailed { destination },
            },
        )
        .with_operation("copy")
    }

    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(
            format!("{} does not exist", path.display()),
            FilesystemCause {
                path: Some(path),
                reason: FilesystemReason::FileNotFound,
            },
        )
    }

    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            message,
            ValidationCause {
                field: Some(field.into()),
                constraint: Some(constraint.into()),
                reason: ValidationReason::General,
            },
        )
    }

    pub fn invalid_value(
        field: impl Into<String>,
        constraint: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let field = field.into();
        let constraint = constraint.into();
        let value = value.into();
        Self::new(
            format!("invalid value '{value}' for {field}: {constraint}"),
            ValidationCause {
                field: Some(field),
                constraint: Some(constraint),
                reason: ValidationReason::InvalidValue { value },
            },
        )
    }

    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.context.container_name = Some(name.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.context.image = Some(image.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Record the container identifier on lifecycle errors; other kinds ignore it.
    pub fn with_container_id(mut self, id: impl Into<String>) -> Self {
        if let Cause::Lifecycle(cause) = &mut self.cause {
            cause.container_id = Some(id.into());
        }
        self
    }

    /// Record the network name on network errors; other kinds ignore it.
    pub fn with_network_name(mut self, network: impl Into<String>) -> Self {
        if let Cause::Network(cause) = &mut self.cause {
            cause.network_name = Some(network.into());
        }
        self
    }

    /// Attach a wrapped lower level error. Replaces any external source.
    pub fn with_parent(mut self, parent: Error) -> Self {
        self.source = Some(Box::new(parent) as BoxError);
        self
    }

    /// Attach a raw failure that originated outside the crate. Replaces any parent.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Copy of this error and its parents. External sources are kept as text.
    pub(crate) fn duplicate(&self) -> Error {
        Error {
            message: self.message.clone(),
            context: self.context.clone(),
            cause: self.cause.clone(),
            source: match self.parent() {
                Some(parent) => Some(Box::new(parent.duplicate()) as BoxError),
                None => self
                    .source
                    .as_ref()
                    .map(|source| BoxError::from(source.to_string())),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn container_context(&self) -> &ContainerContext {
        &self.context
    }

    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    pub fn parent(&self) -> Option<&Error> {
        self.source.as_deref()?.downcast_ref::<Error>()
    }

    /// Raw external failure attached with [`Error::with_source`].
    pub fn external_source(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref().filter(|source| !source.is::<Error>())
    }

    /// True when this error is `kind` or one of its descendants.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind().is_a(kind)
    }

    /// This error followed by its parents, outermost first and root cause last.
    pub fn chain(&self) -> Vec<&Error> {
        let mut out = vec![self];
        let mut current = self.parent();
        while let Some(err) = current {
            out.push(err);
            current = err.parent();
        }
        out
    }

    /// Innermost error of the chain.
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// First error in the chain that is `kind` or a descendant of it.
    pub fn find(&self, kind: ErrorKind) -> Option<&Error> {
        self.chain().into_iter().find(|err| err.is(kind))
    }

    /// Merged context fields: root fields, then branch, then leaf.
    ///
    /// The key set always equals [`ErrorKind::declared_fields`] for
    /// [`Error::kind`].
    pub fn context(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(
            "container_name".into(),
            Value::from(self.context.container_name.clone()),
        );
        map.insert("image".into(), Value::from(self.context.image.clone()));
        map.insert(
            "operation".into(),
            Value::from(self.context.operation.clone()),
        );
        self.cause.write_fields(&mut map);
        map
    }
}

impl Serialize for Error {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Error", 4)?;
        state.serialize_field("name", self.kind().name())?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("cause", &self.context())?;
        match (self.parent(), &self.source) {
            (Some(parent), _) => state.serialize_field("parent", parent)?,
            (None, Some(source)) => state.serialize_field(
                "parent",
                &serde_json::json!({ "name": "ExternalError", "message": source.to_string() }),
            )?,
            (None, None) => state.skip_field("parent")?,
        }
        state.end()
    }
}

/// Membership test over any error value.
///
/// Returns false for errors that are not an [`Error`] at all.
pub fn is_error(err: &(dyn StdError + 'static), kind: ErrorKind) -> bool {
    err.downcast_ref::<Error>()
        .is_some_and(|err| err.is(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_descends_from_root() {
        for kind in ErrorKind::ALL {
            assert!(kind.is_a(ErrorKind::Container), "{kind} is not rooted");
        }
        assert!(ErrorKind::Container.ancestors().is_empty());
    }

    #[test]
    fn test_leaf_is_not_its_sibling() {
        assert!(ErrorKind::NotStarted.is_a(ErrorKind::Lifecycle));
        assert!(!ErrorKind::NotStarted.is_a(ErrorKind::AlreadyStarted));
        assert!(!ErrorKind::NotStarted.is_a(ErrorKind::Configuration));
        assert!(!ErrorKind::Lifecycle.is_a(ErrorKind::NotStarted));
    }

    #[test]
    fn test_declared_fields_inherit_parent_fields() {
        assert_eq!(
            ErrorKind::PortBinding.declared_fields(),
            vec!["container_name", "image", "operation", "network_name", "port"]
        );
        assert_eq!(
            ErrorKind::Container.declared_fields(),
            vec!["container_name", "image", "operation"]
        );
    }

    #[test]
    fn test_not_started_names_operation() {
        let err = Error::not_started("exec");
        assert_eq!(err.kind(), ErrorKind::NotStarted);
        assert_eq!(err.container_context().operation.as_deref(), Some("exec"));
        assert!(err.to_string().contains("exec"));
    }

    #[test]
    fn test_empty_message_uses_default() {
        let err = Error::new("", LifecycleReason::CleanupFailed);
        assert_eq!(err.message(), ErrorKind::CleanupFailed.default_message());
    }

    #[test]
    fn test_source_prefers_parent() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let inner = Error::port_binding(80).with_source(io);
        let outer = Error::start_failed("boom").with_parent(inner);

        let source = outer.source().unwrap();
        assert!(is_error(source, ErrorKind::PortBinding));
        assert_eq!(source.source().unwrap().to_string(), "socket closed");
    }

    #[test]
    fn test_source_is_external_without_parent() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let err = Error::port_binding(80).with_source(io);

        assert!(err.parent().is_none());
        assert_eq!(err.source().unwrap().to_string(), "socket closed");
        assert_eq!(err.external_source().unwrap().to_string(), "socket closed");
        assert_eq!(err.to_string(), err.message());

        let outer = Error::start_failed("boom").with_parent(err);
        assert!(outer.external_source().is_none());
        assert_eq!(outer.parent().unwrap().kind(), ErrorKind::PortBinding);
        assert!(Error::not_started("exec").source().is_none());
    }

    #[test]
    fn test_with_container_id_only_touches_lifecycle() {
        let err = Error::start_failed("boom").with_container_id("abc");
        assert_eq!(err.context()["container_id"], Value::from("abc"));

        let err = Error::port_binding(80).with_container_id("abc");
        assert!(!err.context().contains_key("container_id"));
    }

    #[test]
    fn test_serialized_shape() {
        let err = Error::start_failed("boom").with_parent(Error::port_binding(443));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["name"], "StartFailedError");
        assert_eq!(json["message"], "boom");
        assert_eq!(json["parent"]["name"], "PortBindingError");
        assert_eq!(json["parent"]["cause"]["port"], 443);
        assert!(json["parent"].get("parent").is_none());
    }
}
