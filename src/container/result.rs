//! Control object returned by [`ContainerBuilder::start`](super::ContainerBuilder::start).

use super::{ContainerLogs, ExecConfig, ExecOutput, ExposedPort, StartedContainer};
use crate::error::{Error, Result};
use crate::lifecycle::{ContainerLifecycle, LifecycleState};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::info;

/// A running container plus everything resolved while starting it.
///
/// Every operation checks that the container is still running, so using the
/// result after [`ContainerResult::cleanup`] fails with a not-started error.
#[derive(Debug)]
pub struct ContainerResult {
    lifecycle: ContainerLifecycle,
    host: String,
    exposed: Vec<ExposedPort>,
    ports: RwLock<BTreeMap<u16, u16>>,
    reused: bool,
}

impl ContainerResult {
    pub(crate) fn new(
        container: StartedContainer,
        exposed: Vec<ExposedPort>,
        ports: BTreeMap<u16, u16>,
        reused: bool,
    ) -> Self {
        Self {
            host: container.host().to_string(),
            lifecycle: ContainerLifecycle::running(container.name().to_string(), container),
            exposed,
            ports: RwLock::new(ports),
            reused,
        }
    }

    /// Host on which the mapped ports are reachable.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Container port to host port.
    pub fn ports(&self) -> BTreeMap<u16, u16> {
        match self.ports.read() {
            Ok(ports) => ports.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Host port mapped to container `port`.
    ///
    /// # Errors
    ///
    /// Returns a port binding error when `port` was not exposed.
    pub fn mapped_port(&self, port: u16) -> Result<u16> {
        self.ports()
            .get(&port)
            .copied()
            .ok_or_else(|| Error::port_binding(u32::from(port)).with_operation("mapped_port"))
    }

    /// True when an existing container was adopted instead of created.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.state().await
    }

    /// The live container handle.
    pub async fn container(&self) -> Result<StartedContainer> {
        self.lifecycle.handle("container").await
    }

    pub async fn id(&self) -> Result<String> {
        Ok(self.lifecycle.handle("id").await?.id().to_string())
    }

    /// Run `cmd` in the container.
    pub async fn exec<I, S>(&self, cmd: I) -> Result<ExecOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec_with(&ExecConfig::command(cmd)).await
    }

    pub async fn exec_with(&self, config: &ExecConfig) -> Result<ExecOutput> {
        self.lifecycle.handle("exec").await?.exec(config).await
    }

    /// Follow the container's output.
    pub async fn logs(&self) -> Result<ContainerLogs> {
        Ok(self.lifecycle.handle("logs").await?.log_stream())
    }

    /// Restart the container and re-resolve its port mappings, which the
    /// runtime may have changed.
    pub async fn restart(&self) -> Result<()> {
        let container = self.lifecycle.handle("restart").await?;
        container.restart().await?;

        let mut ports = BTreeMap::new();
        for port in &self.exposed {
            let host_port = container.mapped_port(*port).await?;
            ports.insert(port.port(), host_port);
        }
        match self.ports.write() {
            Ok(mut guard) => *guard = ports,
            Err(poisoned) => *poisoned.into_inner() = ports,
        }
        Ok(())
    }

    pub async fn ip_address(&self, network: &str) -> Result<String> {
        self.lifecycle.handle("ip_address").await?.ip_address(network).await
    }

    /// Remove the container. Once removal succeeds, further calls do nothing;
    /// after a failed removal the result keeps running and can be cleaned up
    /// again.
    ///
    /// A reused container is left running for the next test run.
    pub async fn cleanup(&self) -> Result<()> {
        let reused = self.reused;
        self.lifecycle
            .stop_with(|container| async move {
                if reused {
                    info!("Leaving reused container {} running", container.name());
                    return Ok(());
                }
                container.remove().await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::{RecordingRuntime, RuntimeOp};
    use std::sync::Arc;

    fn result(runtime: &Arc<RecordingRuntime>, reused: bool) -> ContainerResult {
        let container = StartedContainer::new("c1", "redis", None, runtime.clone());
        let exposed = vec![ExposedPort::tcp(6379).unwrap()];
        ContainerResult::new(container, exposed, BTreeMap::from([(6379, 32768)]), reused)
    }

    #[tokio::test]
    async fn test_cleanup_twice_removes_once() {
        let runtime = Arc::new(RecordingRuntime::new());
        let result = result(&runtime, false);

        result.cleanup().await.unwrap();
        result.cleanup().await.unwrap();

        let removals = runtime
            .ops()
            .into_iter()
            .filter(|op| *op == RuntimeOp::RemoveContainer)
            .count();
        assert_eq!(removals, 1);
    }

    #[tokio::test]
    async fn test_use_after_cleanup_is_not_started() {
        let runtime = Arc::new(RecordingRuntime::new());
        let result = result(&runtime, false);
        result.cleanup().await.unwrap();

        let err = result.exec(["redis-cli", "ping"]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotStarted);
        assert_eq!(err.context()["operation"], "exec");
        assert_eq!(err.context()["current_state"], "stopped");
    }

    #[tokio::test]
    async fn test_reused_container_is_kept() {
        let runtime = Arc::new(RecordingRuntime::new());
        let result = result(&runtime, true);
        result.cleanup().await.unwrap();

        assert!(!runtime.ops().contains(&RuntimeOp::RemoveContainer));
        assert_eq!(result.state().await, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_port_is_port_binding() {
        let runtime = Arc::new(RecordingRuntime::new());
        let result = result(&runtime, false);

        assert_eq!(result.mapped_port(6379).unwrap(), 32768);
        let err = result.mapped_port(80).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PortBinding);
        assert_eq!(err.context()["port"], 80);
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_cleanup_error() {
        let runtime = Arc::new(RecordingRuntime::new());
        runtime.fail(RuntimeOp::RemoveContainer, "device busy");
        let result = result(&runtime, false);

        let err = result.cleanup().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CleanupFailed);
        assert!(err.is(ErrorKind::Lifecycle));
    }

    #[tokio::test]
    async fn test_cleanup_retries_after_failed_removal() {
        let runtime = Arc::new(RecordingRuntime::new());
        runtime.fail(RuntimeOp::RemoveContainer, "device busy");
        let result = result(&runtime, false);

        assert!(result.cleanup().await.is_err());
        assert_eq!(result.state().await, LifecycleState::Running);

        runtime.recover(RuntimeOp::RemoveContainer);
        result.cleanup().await.unwrap();
        result.cleanup().await.unwrap();

        let removals = runtime
            .ops()
            .into_iter()
            .filter(|op| *op == RuntimeOp::RemoveContainer)
            .count();
        assert_eq!(removals, 2);
        assert_eq!(result.state().await, LifecycleState::Stopped);
    }
}
