use super::ComposeDefinition;
use crate::container::StartedContainer;
use crate::runtime::RuntimeResult;
use async_trait::async_trait;

/// Runs compose definitions.
///
/// Like [`ContainerRuntime`](crate::runtime::ContainerRuntime), failures are
/// plain `anyhow` errors that the compose builder rewraps.
#[async_trait]
pub trait ComposeEngine: Send + Sync {
    /// Create and start every service in the background.
    async fn up(&self, definition: &ComposeDefinition) -> RuntimeResult<()>;

    /// Stop and remove the project.
    async fn down(&self, definition: &ComposeDefinition) -> RuntimeResult<()>;

    /// Container started for `service`, `None` when it is not running.
    async fn container(
        &self,
        definition: &ComposeDefinition,
        service: &str,
    ) -> RuntimeResult<Option<StartedContainer>>;

    /// Services defined by the compose file.
    async fn services(&self, definition: &ComposeDefinition) -> RuntimeResult<Vec<String>>;
}
