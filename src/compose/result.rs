//! What [`ComposeBuilder::start`](super::ComposeBuilder::start) returns.

use super::{ComposeDefinition, ComposeEngine};
use crate::container::StartedContainer;
use crate::error::{ComposeReason, Error, LifecycleCause, LifecycleReason, Result};
use crate::service::{ContainerService, ErasedService};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// A service registered on a compose builder.
#[derive(Clone)]
pub(crate) struct RegisteredService {
    pub(crate) name: String,
    pub(crate) service: Arc<dyn ErasedService>,
}

struct ConnectionEntry {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Connection info of every registered service, keyed by service name.
///
/// Values keep the type their service declared; read them back with
/// [`ConnectionInfoMap::get`] naming the service type.
#[derive(Default)]
pub struct ConnectionInfoMap {
    entries: BTreeMap<String, ConnectionEntry>,
}

impl ConnectionInfoMap {
    pub(crate) fn insert(
        &mut self,
        name: String,
        value: Arc<dyn Any + Send + Sync>,
        type_name: &'static str,
    ) {
        self.entries.insert(name, ConnectionEntry { value, type_name });
    }

    /// Connection info of the service registered as `name`, as declared by `S`.
    ///
    /// # Errors
    ///
    /// Returns a validation error when no service is registered under `name`
    /// or when its connection info is not `S::ConnectionInfo`.
    pub fn get<S: ContainerService>(&self, name: &str) -> Result<&S::ConnectionInfo> {
        let entry = self.entries.get(name).ok_or_else(|| {
            Error::invalid_value(
                "service",
                format!("registered services: {}", self.names().join(", ")),
                name,
            )
        })?;
        entry
            .value
            .downcast_ref::<S::ConnectionInfo>()
            .ok_or_else(|| {
                Error::validation(
                    "connection_info",
                    format!("connection info of '{name}' is {}", entry.type_name),
                    format!(
                        "connection info of '{name}' is not {}",
                        std::any::type_name::<S::ConnectionInfo>()
                    ),
                )
            })
    }

    /// Service names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ConnectionInfoMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v.type_name)))
            .finish()
    }
}

/// A started compose environment.
///
/// After [`cleanup`](ComposeResult::cleanup), container lookups fail with a
/// not-started error and further cleanups do nothing.
pub struct ComposeResult {
    definition: ComposeDefinition,
    engine: Arc<dyn ComposeEngine>,
    services: Vec<RegisteredService>,
    connection_info: ConnectionInfoMap,
    network: String,
    cleaned: AtomicBool,
}

impl ComposeResult {
    pub(crate) fn new(
        definition: ComposeDefinition,
        engine: Arc<dyn ComposeEngine>,
        services: Vec<RegisteredService>,
        connection_info: ConnectionInfoMap,
        network: String,
    ) -> Self {
        Self {
            definition,
            engine,
            services,
            connection_info,
            network,
            cleaned: AtomicBool::new(false),
        }
    }

    pub fn definition(&self) -> &ComposeDefinition {
        &self.definition
    }

    pub fn engine(&self) -> &Arc<dyn ComposeEngine> {
        &self.engine
    }

    /// Network the compose project's containers share.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Registered service names, in registration order.
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    pub fn connection_infos(&self) -> &ConnectionInfoMap {
        &self.connection_info
    }

    /// Connection info of the service registered as `name`.
    ///
    /// ```no_run
    /// # use testenv::compose::ComposeResult;
    /// # use testenv::service::{CustomService, ServiceDescriptor};
    /// # fn read<D: ServiceDescriptor>(env: &ComposeResult) -> testenv::Result<()> {
    /// let info = env.connection_info::<CustomService<D>>("db")?;
    /// println!("{info:?}");
    /// # Ok(())
    /// # }
    /// ```
    pub fn connection_info<S: ContainerService>(&self, name: &str) -> Result<&S::ConnectionInfo> {
        self.connection_info.get::<S>(name)
    }

    /// The registered service itself.
    ///
    /// # Errors
    ///
    /// Returns a service-not-found error for an unknown name and a validation
    /// error when the service is not an `S`.
    pub fn service<S: ContainerService>(&self, name: &str) -> Result<Arc<S>> {
        let registered = self.registered(name)?;
        registered
            .service
            .clone()
            .into_any()
            .downcast::<S>()
            .map_err(|_| {
                Error::validation(
                    "service",
                    format!("service '{name}' has a different type"),
                    format!("service '{name}' is not {}", std::any::type_name::<S>()),
                )
            })
    }

    fn registered(&self, name: &str) -> Result<&RegisteredService> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                Error::service_not_found(
                    self.definition.path(),
                    self.definition.file(),
                    name,
                    self.service_names(),
                )
            })
    }

    /// Container started for the registered service `name`.
    ///
    /// # Errors
    ///
    /// Returns a not-started error after cleanup and a service-not-found
    /// error naming the registered services otherwise.
    pub async fn get_container(&self, name: &str) -> Result<StartedContainer> {
        if self.cleaned.load(Ordering::SeqCst) {
            return Err(Error::new(
                "cannot get_container: compose environment was cleaned up",
                LifecycleCause {
                    current_state: Some("stopped".into()),
                    expected_state: Some("running".into()),
                    container_id: None,
                    reason: LifecycleReason::NotStarted,
                },
            )
            .with_container_name(name)
            .with_operation("get_container"));
        }
        self.registered(name)?;

        let not_found = || {
            Error::service_not_found(
                self.definition.path(),
                self.definition.file(),
                name,
                self.service_names(),
            )
        };
        match self.engine.container(&self.definition, name).await {
            Ok(Some(container)) => Ok(container),
            Ok(None) => Err(not_found()),
            Err(e) => Err(not_found().with_source(e)),
        }
    }

    /// Services the compose file defines, registered or not.
    pub async fn defined_services(&self) -> Result<Vec<String>> {
        self.engine.services(&self.definition).await.map_err(|e| {
            Error::compose(
                self.definition.path(),
                self.definition.file(),
                ComposeReason::General,
                "failed to list compose services",
            )
            .with_source(e)
        })
    }

    /// Tear the environment down, then stop every service in reverse
    /// registration order.
    ///
    /// Every step runs even if an earlier one fails; the first failure is
    /// returned afterwards. A second call does nothing.
    pub async fn cleanup(&self) -> Result<()> {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(
            "Cleaning up compose environment {}",
            self.definition.compose_file().display()
        );

        let mut errors = Vec::new();
        if let Err(e) = self.engine.down(&self.definition).await {
            warn!("compose down failed: {}", e);
            errors.push(
                Error::compose(
                    self.definition.path(),
                    self.definition.file(),
                    ComposeReason::StopFailed,
                    format!("failed to stop {}", self.definition.compose_file().display()),
                )
                .with_source(e),
            );
        }

        for registered in self.services.iter().rev() {
            if let Err(e) = registered.service.shutdown().await {
                warn!("Failed to stop service {}: {}", registered.name, e);
                errors.push(e);
            }
        }

        match errors.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ComposeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposeResult")
            .field("compose_file", &self.definition.compose_file())
            .field("network", &self.network)
            .field("services", &self.service_names())
            .field("connection_info", &self.connection_info)
            .finish_non_exhaustive()
    }
}
