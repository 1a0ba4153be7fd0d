//! User-defined networks that containers can join.

use crate::env::labels;
use crate::error::{Error, Result};
use crate::runtime::ContainerRuntime;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// A network created through a [`ContainerRuntime`].
///
/// Passing a `Network` to [`ContainerBuilder::with_network`](super::ContainerBuilder::with_network)
/// attaches the container to it.
#[derive(Clone)]
pub struct Network {
    id: String,
    name: String,
    runtime: Arc<dyn ContainerRuntime>,
}

impl Network {
    /// Create a network with a generated name.
    pub async fn create(runtime: Arc<dyn ContainerRuntime>) -> Result<Self> {
        let name = format!("testenv-{}", uuid::Uuid::new_v4().simple());
        Self::create_named(runtime, name).await
    }

    /// Create a network called `name`.
    ///
    /// # Errors
    ///
    /// Returns a network-create error when the runtime refuses.
    pub async fn create_named(
        runtime: Arc<dyn ContainerRuntime>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let labels = BTreeMap::from([(labels::MANAGED.to_string(), "true".to_string())]);

        let id = runtime
            .create_network(&name, &labels)
            .await
            .map_err(|e| Error::network_create_failed(&name).with_source(e))?;

        info!("Created network: {} ({})", name, id);
        Ok(Self { id, name, runtime })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the network. Containers still attached make this fail.
    pub async fn remove(&self) -> Result<()> {
        self.runtime.remove_network(&self.id).await.map_err(|e| {
            Error::cleanup_failed(format!("failed to remove network {}", self.name))
                .with_source(e)
        })?;
        info!("Removed network: {}", self.name);
        Ok(())
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::{RecordingRuntime, RuntimeOp};

    #[tokio::test]
    async fn test_create_and_remove() {
        let runtime = Arc::new(RecordingRuntime::new());
        let network = Network::create_named(runtime.clone(), "backend").await.unwrap();
        assert_eq!(network.name(), "backend");
        assert!(!network.id().is_empty());

        network.remove().await.unwrap();
        assert_eq!(
            runtime.ops(),
            vec![RuntimeOp::CreateNetwork, RuntimeOp::RemoveNetwork]
        );
    }

    #[tokio::test]
    async fn test_create_failure_is_network_error() {
        let runtime = Arc::new(RecordingRuntime::new());
        runtime.fail(RuntimeOp::CreateNetwork, "network exists");

        let err = Network::create_named(runtime, "backend").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkCreateFailed);
        assert!(err.is(ErrorKind::Network));
        assert_eq!(err.context()["network_name"], "backend");
    }
}
