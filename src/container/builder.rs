//! Fluent builder for one standalone container.
//!
//! Setters never fail. The first invalid argument is remembered and returned
//! by [`ContainerBuilder::start`] before the runtime is contacted. Singular
//! fields (working directory, user, command...) are overwritten by later
//! calls; cumulative fields (ports, environment, labels, capabilities, copy
//! instructions) are merged, with later keys winning on conflict.

use super::request::{ImagePlan, LaunchPlan, registry_of, validate_image_reference};
use super::{
    BuildSpec, ContainerConfig, ContainerResult, CopyToContainer, ExposedPort, ImageSource,
    NetworkRef, Protocol, PullPolicy, ResourceLimits, StartedContainer,
};
use crate::env::labels;
use crate::error::{Error, Result};
use crate::runtime::{self, BuildFailure, BuildFailureReason, ContainerRuntime};
use crate::settings::Settings;
use crate::wait::{WaitStrategy, wait_until_ready};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Builder for a single container.
///
/// ```rust,no_run
/// use testenv::ContainerBuilder;
///
/// # async fn run() -> testenv::Result<()> {
/// let redis = ContainerBuilder::new("redis:7-alpine")
///     .with_exposed_port(6379)
///     .with_env("REDIS_ARGS", "--appendonly yes")
///     .start()
///     .await?;
///
/// let port = redis.mapped_port(6379)?;
/// println!("redis on {}:{}", redis.host(), port);
/// redis.cleanup().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ContainerBuilder {
    image: ImageSource,
    config: ContainerConfig,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    settings: Option<Settings>,
    error: Option<Error>,
}

impl ContainerBuilder {
    /// Start from an image reference such as `redis:7-alpine`.
    pub fn new(image: impl Into<String>) -> Self {
        let image = image.into();
        let error = validate_image_reference(&image).err();
        Self {
            image: ImageSource::Reference(image),
            config: ContainerConfig::default(),
            runtime: None,
            settings: None,
            error,
        }
    }

    /// Build the image from `spec` instead of pulling one.
    pub fn from_build(spec: BuildSpec) -> Self {
        let error = spec.context.as_os_str().is_empty().then(|| {
            Error::missing_configuration("build.context", "build context path must not be empty")
        });
        Self {
            image: ImageSource::Build(spec),
            config: ContainerConfig::default(),
            runtime: None,
            settings: None,
            error,
        }
    }

    fn fail(mut self, err: Error) -> Self {
        if self.error.is_none() {
            debug!("Deferring builder error: {}", err);
            self.error = Some(err);
        }
        self
    }

    fn record<T>(self, value: Result<T>, apply: impl FnOnce(&mut ContainerConfig, T)) -> Self {
        match value {
            Ok(value) => {
                let mut builder = self;
                apply(&mut builder.config, value);
                builder
            }
            Err(err) => self.fail(err),
        }
    }

    /// Accumulated configuration.
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn image(&self) -> &ImageSource {
        &self.image
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.entrypoint = Some(entrypoint.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_env(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let checked = if key.is_empty() || key.contains('=') {
            Err(Error::invalid_environment(
                key.clone(),
                format!("'{key}' is not a valid environment variable name"),
            ))
        } else {
            Ok((key, value.into()))
        };
        self.record(checked, |config, (key, value)| {
            config.env.insert(key, value);
        })
    }

    pub fn with_envs<I, K, V>(self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        vars.into_iter()
            .fold(self, |builder, (key, value)| builder.with_env(key, value))
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.working_dir = Some(dir.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.config.user = Some(user.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_labels<I, K, V>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.config
            .labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Memory limit in bytes.
    pub fn with_memory_limit(self, bytes: i64) -> Self {
        let checked = if bytes > 0 {
            Ok(bytes)
        } else {
            Err(Error::invalid_value(
                "resources.memory_bytes",
                "memory limit must be positive",
                bytes.to_string(),
            ))
        };
        self.record(checked, |config, bytes| {
            config.resources.memory_bytes = Some(bytes);
        })
    }

    /// CPU limit in CPUs, e.g. `0.5`.
    pub fn with_cpu_limit(self, cpus: f64) -> Self {
        let checked = if cpus.is_finite() && cpus > 0.0 {
            Ok((cpus * 1_000_000_000.0).round() as i64)
        } else {
            Err(Error::invalid_value(
                "resources.nano_cpus",
                "CPU limit must be a positive number",
                cpus.to_string(),
            ))
        };
        self.record(checked, |config, nano_cpus| {
            config.resources.nano_cpus = Some(nano_cpus);
        })
    }

    pub fn with_resources(mut self, limits: ResourceLimits) -> Self {
        self.config.resources.merge(limits);
        self
    }

    pub fn with_cap_add(mut self, capability: impl Into<String>) -> Self {
        let capability = capability.into();
        if !self.config.cap_add.contains(&capability) {
            self.config.cap_add.push(capability);
        }
        self
    }

    pub fn with_cap_drop(mut self, capability: impl Into<String>) -> Self {
        let capability = capability.into();
        if !self.config.cap_drop.contains(&capability) {
            self.config.cap_drop.push(capability);
        }
        self
    }

    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.config.privileged = privileged;
        self
    }

    /// Copy a host file or directory to `target` before the container starts.
    pub fn with_copy_file(mut self, source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        self.config
            .copy_to_container
            .push(CopyToContainer::new(source, target));
        self
    }

    /// Join a network.
    ///
    /// Only a [`Network`](super::Network) handle is applied. A bare name is
    /// accepted, logged as a warning at start, and ignored.
    pub fn with_network(mut self, network: impl Into<NetworkRef>) -> Self {
        self.config.network = Some(network.into());
        self
    }

    /// Publish TCP `port` on a host-assigned port.
    pub fn with_exposed_port(self, port: u32) -> Self {
        self.with_port(ExposedPort::tcp(port))
    }

    pub fn with_exposed_ports<I>(self, ports: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        ports
            .into_iter()
            .fold(self, |builder, port| builder.with_exposed_port(port))
    }

    pub fn with_exposed_udp_port(self, port: u32) -> Self {
        self.with_port(ExposedPort::new(port, Protocol::Udp))
    }

    /// Publish a port given as `"8080"`, `"8080/tcp"` or `"53/udp"`.
    pub fn with_exposed_port_spec(self, spec: &str) -> Self {
        self.with_port(ExposedPort::parse(spec))
    }

    fn with_port(self, port: Result<ExposedPort>) -> Self {
        self.record(port, |config, port| {
            if !config.exposed_ports.contains(&port) {
                config.exposed_ports.push(port);
            }
        })
    }

    pub fn with_wait_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.config.wait_strategy = Some(strategy);
        self
    }

    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.config.pull_policy = policy;
        self
    }

    /// Adopt a running container created from the same configuration, and
    /// leave it running on cleanup. Needs `reuse_enabled` in [`Settings`].
    pub fn with_reuse(mut self, reuse: bool) -> Self {
        self.config.reuse = reuse;
        self
    }

    pub fn with_startup_timeout(self, timeout: Duration) -> Self {
        let checked = if timeout.is_zero() {
            Err(Error::invalid_value(
                "startup_timeout",
                "startup timeout must be positive",
                format!("{timeout:?}"),
            ))
        } else {
            Ok(timeout)
        };
        self.record(checked, |config, timeout| {
            config.startup_timeout = Some(timeout);
        })
    }

    /// Use `runtime` instead of connecting to Docker.
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Use `settings` instead of [`Settings::discover`].
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// The plan `start()` would execute with `settings`.
    pub fn plan(&self, settings: &Settings) -> Result<LaunchPlan> {
        if let Some(err) = &self.error {
            return Err(err.duplicate());
        }
        LaunchPlan::new(&self.image, &self.config, settings)
    }

    /// Create, start and wait for the container.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setter argument before contacting the
    /// runtime. After that, image failures are image errors, create and start
    /// failures are start-failed errors, and an unmet wait strategy is a
    /// startup timeout. The container is removed when any step after
    /// creation fails.
    pub async fn start(self) -> Result<ContainerResult> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let settings = match self.settings {
            Some(settings) => settings,
            None => Settings::discover()?,
        };
        let plan = LaunchPlan::new(&self.image, &self.config, &settings)?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => runtime::connect_default(&settings).await?,
        };

        prepare_image(runtime.as_ref(), &plan).await?;

        if plan.reuse
            && let Some(result) = adopt_existing(&runtime, &plan).await?
        {
            return Ok(result);
        }

        let image = plan.image.reference().to_string();
        let name = plan.request.name.clone().unwrap_or_else(|| image.clone());

        info!("Creating container {} from {}", name, image);
        let id = runtime
            .create_container(&plan.request)
            .await
            .map_err(|e| {
                Error::start_failed(format!("failed to create container from {image}"))
                    .with_container_name(&name)
                    .with_image(&image)
                    .with_source(e)
            })?;

        let container = StartedContainer::new(id, name, Some(image), runtime);
        match launch(&container, &plan).await {
            Ok(ports) => Ok(ContainerResult::new(
                container,
                plan.request.exposed_ports.clone(),
                ports,
                false,
            )),
            Err(err) => {
                if let Err(cleanup) = container.remove().await {
                    warn!(
                        "Failed to remove container {} after failed start: {}",
                        container.short_id(),
                        cleanup
                    );
                }
                Err(err)
            }
        }
    }
}

async fn prepare_image(runtime: &dyn ContainerRuntime, plan: &LaunchPlan) -> Result<()> {
    match &plan.image {
        ImagePlan::Pull { reference, policy } => {
            let present = match policy {
                PullPolicy::Always => false,
                PullPolicy::Missing | PullPolicy::Never => {
                    runtime.image_exists(reference).await.map_err(|e| {
                        Error::daemon_unavailable(
                            runtime.docker_host(),
                            format!("failed to inspect image {reference}"),
                        )
                        .with_image(reference)
                        .with_source(e)
                    })?
                }
            };

            match (present, policy) {
                (true, _) => {
                    debug!("Image {} already present", reference);
                    Ok(())
                }
                (false, PullPolicy::Never) => Err(Error::image_not_found(reference)),
                (false, _) => {
                    info!("Pulling image {}", reference);
                    runtime.pull_image(reference).await.map_err(|e| {
                        Error::image_pull_failed(reference, registry_of(reference)).with_source(e)
                    })
                }
            }
        }
        ImagePlan::Build { spec, tag } => {
            if !spec.context.is_dir() {
                return Err(Error::file_not_found(&spec.context)
                    .with_image(tag)
                    .with_operation("build"));
            }
            let dockerfile = spec.dockerfile_path();
            if !dockerfile.is_file() {
                return Err(Error::dockerfile_not_found(
                    tag,
                    &dockerfile,
                    format!("{} does not exist", dockerfile.display()),
                ));
            }

            info!("Building image {} from {}", tag, spec.context.display());
            runtime
                .build_image(spec, tag)
                .await
                .map_err(|failure| build_error(spec, tag, failure))
        }
    }
}

/// Map a classified build failure to the matching image error.
fn build_error(spec: &BuildSpec, tag: &str, failure: BuildFailure) -> Error {
    let message = failure.message.clone();
    let err = match failure.reason {
        BuildFailureReason::PullFailed => Error::image_pull_failed(tag, None),
        BuildFailureReason::FileNotFound => {
            Error::dockerfile_not_found(tag, spec.dockerfile_path(), message)
        }
        BuildFailureReason::Syntax => Error::dockerfile_syntax(tag, spec.dockerfile_path(), message),
        BuildFailureReason::Other => Error::image_build_failed(tag, &spec.context, message),
    };
    err.with_source(failure)
}

async fn adopt_existing(
    runtime: &Arc<dyn ContainerRuntime>,
    plan: &LaunchPlan,
) -> Result<Option<ContainerResult>> {
    let Some(hash) = plan.request.labels.get(labels::REUSE_HASH) else {
        return Ok(None);
    };
    let wanted = BTreeMap::from([(labels::REUSE_HASH.to_string(), hash.clone())]);

    let found = runtime.find_container(&wanted).await.map_err(|e| {
        Error::container("failed to look up a reusable container")
            .with_operation("reuse")
            .with_image(&plan.request.image)
            .with_source(e)
    })?;

    let Some(summary) = found.filter(|summary| summary.running) else {
        debug!("No running container to reuse for {}", plan.request.image);
        return Ok(None);
    };

    let name = summary
        .name
        .clone()
        .or_else(|| plan.request.name.clone())
        .unwrap_or_else(|| plan.request.image.clone());
    info!("Reusing container {} ({})", name, summary.id);

    let container = StartedContainer::new(
        summary.id,
        name,
        Some(plan.request.image.clone()),
        runtime.clone(),
    );
    let ports = resolve_ports(&container, &plan.request.exposed_ports).await?;
    Ok(Some(ContainerResult::new(
        container,
        plan.request.exposed_ports.clone(),
        ports,
        true,
    )))
}

/// Copy files, start, wait, and resolve ports of a created container.
async fn launch(container: &StartedContainer, plan: &LaunchPlan) -> Result<BTreeMap<u16, u16>> {
    let runtime = container.runtime();

    for copy in &plan.copies {
        if !copy.source.exists() {
            return Err(Error::file_not_found(&copy.source)
                .with_container_name(container.name())
                .with_operation("copy"));
        }
        runtime
            .copy_to_container(container.id(), copy)
            .await
            .map_err(|e| {
                Error::copy_failed(&copy.source, &copy.target)
                    .with_container_name(container.name())
                    .with_source(e)
            })?;
    }

    runtime.start_container(container.id()).await.map_err(|e| {
        Error::start_failed(format!("failed to start container {}", container.name()))
            .with_container_name(container.name())
            .with_image(&plan.request.image)
            .with_container_id(container.id())
            .with_source(e)
    })?;
    info!("Started container {} ({})", container.name(), container.short_id());

    if let Some(strategy) = &plan.wait_strategy {
        wait_until_ready(container, strategy, plan.startup_timeout, plan.poll_interval).await?;
    }

    resolve_ports(container, &plan.request.exposed_ports).await
}

async fn resolve_ports(
    container: &StartedContainer,
    exposed: &[ExposedPort],
) -> Result<BTreeMap<u16, u16>> {
    let mut ports = BTreeMap::new();
    for port in exposed {
        let host_port = container.mapped_port(*port).await.map_err(|err| {
            Error::start_failed(format!(
                "container {} started but port {} has no host mapping",
                container.name(),
                port
            ))
            .with_container_name(container.name())
            .with_container_id(container.id())
            .with_parent(err)
        })?;
        debug!("{} -> {}:{}", port, container.host(), host_port);
        ports.insert(port.port(), host_port);
    }
    Ok(ports)
}
