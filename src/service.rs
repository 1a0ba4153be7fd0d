//! Services: typed wrappers that expose connection parameters for one container.
//!
//! [`ContainerService`] is the capability set the compose builder drives:
//! lifecycle (`start`, `stop`, `is_started`), a name, typed connection info and
//! post-hoc binding to a container started by the compose engine. Optional
//! compose integration is a separate trait, [`ComposeHooks`], surfaced through
//! [`ContainerService::compose_hooks`].
//!
//! [`CustomService`] is the ready-made implementation: describe the container
//! and how to derive connection info with a [`ServiceDescriptor`], and the
//! lifecycle bookkeeping is handled for you.

use crate::container::{ContainerBuilder, ContainerResult, StartedContainer};
use crate::env::labels;
use crate::error::{Error, LifecycleCause, LifecycleReason, Result};
use crate::lifecycle::{ContainerLifecycle, LifecycleState};
use crate::runtime::ContainerRuntime;
use crate::settings::Settings;
use crate::wait::WaitStrategy;
use async_trait::async_trait;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Hooks the compose builder applies before the environment starts.
pub trait ComposeHooks: Send + Sync {
    /// Readiness check for the service's compose container.
    fn wait_strategy(&self) -> Result<Option<WaitStrategy>> {
        Ok(None)
    }

    /// Variables added to the compose environment.
    fn environment(&self) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}

/// Something that manages one container and knows how to reach it.
#[async_trait]
pub trait ContainerService: Send + Sync + 'static {
    /// What clients need to talk to the service: host, ports, credentials.
    type ConnectionInfo: Clone + fmt::Debug + Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Start the service's own container.
    async fn start(&self) -> Result<()>;

    /// Release the container. Calling `stop` again does nothing.
    async fn stop(&self) -> Result<()>;

    async fn is_started(&self) -> bool;

    /// # Errors
    ///
    /// Fails with a not-started error unless the service is running.
    async fn connection_info(&self) -> Result<Self::ConnectionInfo>;

    /// Bind to a container that the compose engine started.
    async fn initialize_from_container(&self, container: StartedContainer) -> Result<()> {
        let _ = container;
        Ok(())
    }

    fn compose_hooks(&self) -> Option<&dyn ComposeHooks> {
        None
    }
}

/// Type-erased view of a [`ContainerService`], so services with different
/// connection info types can be registered side by side.
#[async_trait]
pub(crate) trait ErasedService: Send + Sync {
    fn hooks(&self) -> Option<&dyn ComposeHooks>;

    async fn bind(&self, container: StartedContainer) -> Result<()>;

    async fn erased_connection_info(&self) -> Result<Arc<dyn Any + Send + Sync>>;

    async fn shutdown(&self) -> Result<()>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn connection_info_type(&self) -> &'static str;
}

#[async_trait]
impl<S: ContainerService> ErasedService for S {
    fn hooks(&self) -> Option<&dyn ComposeHooks> {
        self.compose_hooks()
    }

    async fn bind(&self, container: StartedContainer) -> Result<()> {
        self.initialize_from_container(container).await
    }

    async fn erased_connection_info(&self) -> Result<Arc<dyn Any + Send + Sync>> {
        let info = self.connection_info().await?;
        Ok(Arc::new(info))
    }

    async fn shutdown(&self) -> Result<()> {
        self.stop().await
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn connection_info_type(&self) -> &'static str {
        std::any::type_name::<S::ConnectionInfo>()
    }
}

/// Description of a service built on [`CustomService`].
#[async_trait]
pub trait ServiceDescriptor: Send + Sync + 'static {
    type ConnectionInfo: Clone + fmt::Debug + Send + Sync + 'static;

    /// Builder for the container when the service starts it itself.
    fn container(&self) -> ContainerBuilder;

    /// Derive connection info from the live container.
    async fn connection_info(&self, container: &StartedContainer) -> Result<Self::ConnectionInfo>;

    fn wait_strategy(&self) -> Result<Option<WaitStrategy>> {
        Ok(None)
    }

    fn environment(&self) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}

/// [`ContainerService`] built from a [`ServiceDescriptor`].
///
/// Started on its own, the service owns its container and removes it on
/// [`stop`](ContainerService::stop). Bound through a compose environment it
/// only releases its handle; the compose engine removes the container.
pub struct CustomService<D: ServiceDescriptor> {
    name: String,
    descriptor: D,
    lifecycle: ContainerLifecycle,
    owned: Mutex<Option<ContainerResult>>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    settings: Option<Settings>,
}

impl<D: ServiceDescriptor> CustomService<D> {
    pub fn new(name: impl Into<String>, descriptor: D) -> Self {
        let name = name.into();
        Self {
            lifecycle: ContainerLifecycle::new(name.clone()),
            name,
            descriptor,
            owned: Mutex::new(None),
            runtime: None,
            settings: None,
        }
    }

    /// Runtime passed to the container builder on [`ContainerService::start`].
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn descriptor(&self) -> &D {
        &self.descriptor
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.state().await
    }

    /// The live container handle.
    pub async fn container(&self) -> Result<StartedContainer> {
        self.lifecycle.handle("container").await
    }
}

impl<D: ServiceDescriptor> ComposeHooks for CustomService<D> {
    fn wait_strategy(&self) -> Result<Option<WaitStrategy>> {
        self.descriptor.wait_strategy()
    }

    fn environment(&self) -> Result<BTreeMap<String, String>> {
        self.descriptor.environment()
    }
}

#[async_trait]
impl<D: ServiceDescriptor> ContainerService for CustomService<D> {
    type ConnectionInfo = D::ConnectionInfo;

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        match self.lifecycle.state().await {
            LifecycleState::Uninitialized => {}
            LifecycleState::Running => {
                return Err(Error::already_started("start", LifecycleState::Running.as_str())
                    .with_container_name(&self.name));
            }
            LifecycleState::Stopped => {
                return Err(Error::new(
                    format!("{} was stopped; create a new service to start it again", self.name),
                    LifecycleCause {
                        current_state: Some(LifecycleState::Stopped.to_string()),
                        expected_state: Some(LifecycleState::Uninitialized.to_string()),
                        container_id: None,
                        reason: LifecycleReason::General,
                    },
                )
                .with_container_name(&self.name)
                .with_operation("start"));
            }
        }

        let mut builder = self
            .descriptor
            .container()
            .with_label(labels::SERVICE, &self.name);
        if let Some(strategy) = self.descriptor.wait_strategy()? {
            builder = builder.with_wait_strategy(strategy);
        }
        if let Some(runtime) = &self.runtime {
            builder = builder.with_runtime(runtime.clone());
        }
        if let Some(settings) = &self.settings {
            builder = builder.with_settings(settings.clone());
        }

        info!("Starting service {}", self.name);
        let result = builder.start().await?;
        let container = result.container().await?;

        if let Err(e) = self.lifecycle.bind(container).await {
            if let Err(cleanup) = result.cleanup().await {
                warn!("Failed to remove container of {}: {}", self.name, cleanup);
            }
            return Err(e);
        }
        *self.owned.lock().await = Some(result);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let owned = &self.owned;
        let name = &self.name;
        self.lifecycle
            .stop_with(|_| async move {
                info!("Stopping service {}", name);
                let mut owned = owned.lock().await;
                if let Some(result) = owned.as_ref() {
                    result.cleanup().await?;
                }
                owned.take();
                Ok(())
            })
            .await
    }

    async fn is_started(&self) -> bool {
        self.lifecycle.is_started().await
    }

    async fn connection_info(&self) -> Result<Self::ConnectionInfo> {
        let container = self.lifecycle.handle("connection_info").await?;
        self.descriptor.connection_info(&container).await
    }

    async fn initialize_from_container(&self, container: StartedContainer) -> Result<()> {
        debug!("Binding service {} to {}", self.name, container.name());
        self.lifecycle.bind(container).await
    }

    fn compose_hooks(&self) -> Option<&dyn ComposeHooks> {
        Some(self)
    }
}

impl<D: ServiceDescriptor> fmt::Debug for CustomService<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomService")
            .field("name", &self.name)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}
