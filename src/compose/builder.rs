//! Fluent builder that validates and starts a compose environment.

use super::{
    ComposeConfig, ComposeDefinition, ComposeEngine, ComposeResult, ConnectionInfoMap,
    DownOptions, RecreatePolicy, RegisteredService,
};
use crate::container::PullPolicy;
use crate::error::{ComposeReason, Error, ErrorKind, Result};
use crate::service::{ContainerService, ErasedService};
use crate::settings::Settings;
use crate::wait::{WaitStrategy, wait_until_ready};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fluent builder for one compose environment.
///
/// ```no_run
/// # use testenv::compose::ComposeBuilder;
/// # async fn run() -> testenv::Result<()> {
/// let env = ComposeBuilder::new("tests/stack", "compose.yml")
///     .with_project_name("itest")
///     .with_env("POSTGRES_PASSWORD", "secret")
///     .start()
///     .await?;
/// println!("network: {}", env.network());
/// env.cleanup().await?;
/// # Ok(())
/// # }
/// ```
pub struct ComposeBuilder {
    path: PathBuf,
    file: String,
    config: ComposeConfig,
    services: Vec<RegisteredService>,
    engine: Option<Arc<dyn ComposeEngine>>,
    settings: Option<Settings>,
    error: Option<Error>,
}

impl ComposeBuilder {
    /// Builder for `<path>/<file>`.
    pub fn new(path: impl Into<PathBuf>, file: impl Into<String>) -> Self {
        let builder = Self {
            path: path.into(),
            file: file.into(),
            config: ComposeConfig::default(),
            services: Vec::new(),
            engine: None,
            settings: None,
            error: None,
        };
        if builder.file.trim().is_empty() {
            let err = Error::validation(
                "compose_file",
                "must not be empty",
                "compose file name must not be empty",
            );
            return builder.fail(err);
        }
        builder
    }

    fn fail(mut self, err: Error) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }

    pub fn config(&self) -> &ComposeConfig {
        &self.config
    }

    /// Registered service names, in registration order.
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    /// Register `service` under the compose service name `name`.
    ///
    /// Registering a name twice is an error reported by [`start`](Self::start).
    pub fn with_service<S: ContainerService>(mut self, name: impl Into<String>, service: S) -> Self {
        let name = name.into();
        if name.trim().is_empty() {
            return self.fail(Error::validation(
                "service",
                "name must not be empty",
                "service name must not be empty",
            ));
        }
        if self.services.iter().any(|s| s.name == name) {
            let err = Error::invalid_value(
                "service",
                "service names must be unique",
                &name,
            );
            return self.fail(err);
        }
        debug!("Registered service {} ({})", name, service.name());
        self.services.push(RegisteredService {
            name,
            service: Arc::new(service),
        });
        self
    }

    /// Set a variable for compose file interpolation. Later values win.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if key.is_empty() || key.contains('=') {
            let err = Error::invalid_environment(
                key.clone(),
                format!("'{key}' is not a valid environment variable name"),
            );
            return self.fail(err);
        }
        self.config.environment.insert(key, value.into());
        self
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

    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.env_file = Some(path.into());
        self
    }

    /// Build images before starting.
    pub fn with_build(mut self, build: bool) -> Self {
        self.config.build = build;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        let profile = profile.into();
        if !self.config.profiles.contains(&profile) {
            self.config.profiles.push(profile);
        }
        self
    }

    pub fn with_profiles<I, S>(self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        profiles
            .into_iter()
            .fold(self, |builder, profile| builder.with_profile(profile))
    }

    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if !valid {
            let err = Error::invalid_value(
                "project_name",
                "lowercase letters, digits, '_' and '-' only",
                &name,
            );
            return self.fail(err);
        }
        self.config.project_name = Some(name);
        self
    }

    pub fn with_recreate(mut self, policy: RecreatePolicy) -> Self {
        self.config.recreate = policy;
        self
    }

    /// Readiness check for compose service `service`.
    pub fn with_wait_strategy(mut self, service: impl Into<String>, strategy: WaitStrategy) -> Self {
        self.config.wait_strategies.insert(service.into(), strategy);
        self
    }

    /// Limit on the wait strategies; the settings' startup timeout by default.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            let err = Error::invalid_value("wait_timeout", "must be greater than zero", "0s");
            return self.fail(err);
        }
        self.config.wait_timeout = Some(timeout);
        self
    }

    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.config.pull_policy = Some(policy);
        self
    }

    pub fn with_down_options(mut self, down: DownOptions) -> Self {
        self.config.down = down;
        self
    }

    pub fn with_remove_volumes(mut self, remove: bool) -> Self {
        self.config.down.remove_volumes = remove;
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn ComposeEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Start the environment, bind every registered service to its container
    /// and collect their connection info.
    ///
    /// # Errors
    ///
    /// - the first invalid builder argument
    /// - a compose start error when the engine fails to start the project or
    ///   a wait strategy does not hold
    /// - a service-not-found error when a registered service has no container
    ///   or cannot bind to it
    /// - any other failure, rewrapped as a compose error
    pub async fn start(self) -> Result<ComposeResult> {
        let path = self.path.clone();
        let file = self.file.clone();
        self.start_inner().await.map_err(|err| match err.kind() {
            ErrorKind::Container => Error::compose(
                path,
                file,
                ComposeReason::General,
                format!("compose environment failed: {}", err.message()),
            )
            .with_parent(err),
            _ => err,
        })
    }

    async fn start_inner(self) -> Result<ComposeResult> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let settings = match self.settings {
            Some(settings) => settings,
            None => Settings::discover()?,
        };
        let engine = match self.engine {
            Some(engine) => engine,
            None => default_engine(&settings).await?,
        };
        let services = self.services;
        let names: Vec<String> = services.iter().map(|s| s.name.clone()).collect();

        let mut definition = ComposeDefinition::new(&self.path, &self.file, self.config);
        for registered in &services {
            if let Some(hooks) = registered.service.hooks() {
                definition.apply_environment(hooks.environment()?);
                if let Some(strategy) = hooks.wait_strategy()? {
                    definition.apply_wait_strategy(&registered.name, strategy);
                }
            }
        }

        info!(
            "Starting compose environment {} ({} services)",
            definition.compose_file().display(),
            services.len()
        );
        engine.up(&definition).await.map_err(|e| {
            Error::compose(
                definition.path(),
                definition.file(),
                ComposeReason::StartFailed,
                format!("failed to start {}", definition.compose_file().display()),
            )
            .with_source(e)
        })?;

        match bind_services(engine.as_ref(), &definition, &services, &names, &settings).await {
            Ok(connection_info) => {
                let network = definition.network_name();
                info!("Compose environment ready on network {}", network);
                Ok(ComposeResult::new(
                    definition,
                    engine,
                    services,
                    connection_info,
                    network,
                ))
            }
            Err(err) => {
                if let Err(down) = engine.down(&definition).await {
                    warn!("Failed to tear down compose environment after error: {}", down);
                }
                Err(err)
            }
        }
    }
}

impl fmt::Debug for ComposeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposeBuilder")
            .field("path", &self.path)
            .field("file", &self.file)
            .field("config", &self.config)
            .field("services", &self.service_names())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "docker")]
async fn default_engine(settings: &Settings) -> Result<Arc<dyn ComposeEngine>> {
    let engine = super::DockerComposeEngine::connect(settings).await?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "docker"))]
async fn default_engine(_settings: &Settings) -> Result<Arc<dyn ComposeEngine>> {
    Err(Error::missing_configuration(
        "engine",
        "no compose engine configured; enable the `docker` feature or pass one with `with_engine`",
    ))
}

/// Wait for readiness, bind services to their containers and collect
/// connection info, in registration order.
async fn bind_services(
    engine: &dyn ComposeEngine,
    definition: &ComposeDefinition,
    services: &[RegisteredService],
    names: &[String],
    settings: &Settings,
) -> Result<ConnectionInfoMap> {
    let wait_timeout = definition
        .config()
        .wait_timeout
        .unwrap_or_else(|| settings.startup_timeout());

    for (service, strategy) in definition.wait_strategies() {
        let container = locate(engine, definition, service, names).await?;
        wait_until_ready(&container, strategy, wait_timeout, settings.poll_interval())
            .await
            .map_err(|e| {
                Error::compose(
                    definition.path(),
                    definition.file(),
                    ComposeReason::StartFailed,
                    format!("service '{service}' did not become ready"),
                )
                .with_container_name(service)
                .with_parent(e)
            })?;
    }

    for registered in services {
        let container = locate(engine, definition, &registered.name, names).await?;
        registered.service.bind(container).await.map_err(|e| {
            Error::service_not_found(
                definition.path(),
                definition.file(),
                &registered.name,
                names.to_vec(),
            )
            .with_parent(e)
        })?;
    }

    let mut connection_info = ConnectionInfoMap::default();
    for registered in services {
        let info = registered.service.erased_connection_info().await?;
        connection_info.insert(
            registered.name.clone(),
            info,
            registered.service.connection_info_type(),
        );
    }
    Ok(connection_info)
}

async fn locate(
    engine: &dyn ComposeEngine,
    definition: &ComposeDefinition,
    service: &str,
    names: &[String],
) -> Result<crate::container::StartedContainer> {
    let not_found = || {
        Error::service_not_found(definition.path(), definition.file(), service, names.to_vec())
    };
    match engine.container(definition, service).await {
        Ok(Some(container)) => Ok(container),
        Ok(None) => Err(not_found()),
        Err(e) => Err(not_found().with_source(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::RecordingComposeEngine;
    use crate::runtime::RecordingRuntime;

    fn builder() -> ComposeBuilder {
        let runtime = Arc::new(RecordingRuntime::new());
        ComposeBuilder::new("/srv/stack", "compose.yml")
            .with_engine(Arc::new(RecordingComposeEngine::new(runtime, ["db"])))
            .with_settings(Settings::default())
    }

    #[test]
    fn test_cumulative_and_singular_settings() {
        let builder = builder()
            .with_env("A", "1")
            .with_env("A", "2")
            .with_env("B", "3")
            .with_profile("db")
            .with_profiles(["db", "cache"])
            .with_project_name("first")
            .with_project_name("second");

        let config = builder.config();
        assert_eq!(config.environment["A"], "2");
        assert_eq!(config.environment["B"], "3");
        assert_eq!(config.profiles, vec!["db", "cache"]);
        assert_eq!(config.project_name.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_invalid_project_name_fails_start() {
        let err = builder()
            .with_project_name("Has Spaces")
            .start()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        assert_eq!(err.context()["field"], "project_name");
    }

    #[tokio::test]
    async fn test_start_without_services() {
        let env = builder().with_project_name("itest").start().await.unwrap();
        assert_eq!(env.network(), "itest_default");
        assert!(env.service_names().is_empty());
        env.cleanup().await.unwrap();
    }
}
