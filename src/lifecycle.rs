//! Start/stop state shared by everything that manages one container.
//!
//! [`ContainerLifecycle`] owns the live [`StartedContainer`] handle and the
//! `uninitialized -> running -> stopped` state machine. There is no way back
//! from `stopped`: a fresh instance is needed to run the container again.

use crate::container::StartedContainer;
use crate::error::{Error, LifecycleCause, LifecycleReason, Result};
use std::fmt;
use std::future::Future;
use tokio::sync::RwLock;
use tracing::debug;

/// Lifecycle state of a managed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Running,
    Stopped,
}

impl LifecycleState {
    pub const fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Slot {
    state: LifecycleState,
    handle: Option<StartedContainer>,
}

/// Owner of one container handle and its lifecycle state.
pub struct ContainerLifecycle {
    name: String,
    slot: RwLock<Slot>,
}

impl ContainerLifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: RwLock::new(Slot {
                state: LifecycleState::Uninitialized,
                handle: None,
            }),
        }
    }

    /// A lifecycle that is already running `handle`.
    pub fn running(name: impl Into<String>, handle: StartedContainer) -> Self {
        Self {
            name: name.into(),
            slot: RwLock::new(Slot {
                state: LifecycleState::Running,
                handle: Some(handle),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> LifecycleState {
        self.slot.read().await.state
    }

    pub async fn is_started(&self) -> bool {
        self.state().await == LifecycleState::Running
    }

    /// Store the live handle and move to `running`.
    ///
    /// # Errors
    ///
    /// Fails with an already-started error when running, and with a lifecycle
    /// error when the lifecycle has already been stopped.
    pub async fn bind(&self, handle: StartedContainer) -> Result<()> {
        let mut slot = self.slot.write().await;
        match slot.state {
            LifecycleState::Uninitialized => {
                debug!("{} bound to container {}", self.name, handle.short_id());
                slot.handle = Some(handle);
                slot.state = LifecycleState::Running;
                Ok(())
            }
            LifecycleState::Running => Err(Error::already_started("start", "running")
                .with_container_name(&self.name)
                .with_container_id(handle.id())),
            LifecycleState::Stopped => Err(Error::new(
                format!("{} was stopped; create a new instance to start it again", self.name),
                LifecycleCause {
                    current_state: Some(LifecycleState::Stopped.to_string()),
                    expected_state: Some(LifecycleState::Uninitialized.to_string()),
                    container_id: Some(handle.id().to_string()),
                    reason: LifecycleReason::General,
                },
            )
            .with_container_name(&self.name)
            .with_operation("start")),
        }
    }

    /// The live handle, for use by `operation`.
    ///
    /// # Errors
    ///
    /// Fails with a not-started error naming `operation` unless running.
    pub async fn handle(&self, operation: &str) -> Result<StartedContainer> {
        let slot = self.slot.read().await;
        match (&slot.handle, slot.state) {
            (Some(handle), LifecycleState::Running) => Ok(handle.clone()),
            (_, state) => Err(Error::new(
                format!("cannot {operation}: {} is {state}", self.name),
                LifecycleCause {
                    current_state: Some(state.to_string()),
                    expected_state: Some(LifecycleState::Running.to_string()),
                    container_id: None,
                    reason: LifecycleReason::NotStarted,
                },
            )
            .with_container_name(&self.name)
            .with_operation(operation)),
        }
    }

    /// Move to `stopped` and hand back the handle.
    ///
    /// Returns `None` when nothing was running, so releasing twice is harmless.
    pub async fn release(&self) -> Option<StartedContainer> {
        let mut slot = self.slot.write().await;
        match slot.state {
            LifecycleState::Running => {
                slot.state = LifecycleState::Stopped;
                slot.handle.take()
            }
            LifecycleState::Uninitialized | LifecycleState::Stopped => {
                debug!("{} release ignored in state {}", self.name, slot.state);
                None
            }
        }
    }

    /// Tear the live handle down and move to `stopped` once `teardown`
    /// succeeds.
    ///
    /// When `teardown` fails the lifecycle stays `running` with its handle,
    /// so a later call can retry. Nothing runs when the lifecycle is not
    /// running.
    pub async fn stop_with<F, Fut>(&self, teardown: F) -> Result<()>
    where
        F: FnOnce(StartedContainer) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut slot = self.slot.write().await;
        let handle = match (slot.state, &slot.handle) {
            (LifecycleState::Running, Some(handle)) => handle.clone(),
            (state, _) => {
                debug!("{} stop ignored in state {}", self.name, state);
                return Ok(());
            }
        };

        teardown(handle).await?;
        slot.state = LifecycleState::Stopped;
        slot.handle = None;
        Ok(())
    }
}

impl fmt::Debug for ContainerLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerLifecycle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::RecordingRuntime;
    use std::sync::Arc;

    fn handle(id: &str) -> StartedContainer {
        StartedContainer::new(id, "svc", None, Arc::new(RecordingRuntime::new()))
    }

    #[tokio::test]
    async fn test_handle_before_start_names_operation() {
        let lifecycle = ContainerLifecycle::new("svc");
        let err = lifecycle.handle("exec").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotStarted);
        assert_eq!(err.context()["operation"], "exec");
        assert_eq!(err.context()["current_state"], "uninitialized");
    }

    #[tokio::test]
    async fn test_bind_then_release() {
        let lifecycle = ContainerLifecycle::new("svc");
        lifecycle.bind(handle("abc")).await.unwrap();
        assert!(lifecycle.is_started().await);
        assert_eq!(lifecycle.handle("logs").await.unwrap().id(), "abc");

        let released = lifecycle.release().await.unwrap();
        assert_eq!(released.id(), "abc");
        assert_eq!(lifecycle.state().await, LifecycleState::Stopped);
        assert!(lifecycle.release().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_teardown_keeps_handle() {
        let lifecycle = ContainerLifecycle::new("svc");
        lifecycle.bind(handle("abc")).await.unwrap();

        let err = lifecycle
            .stop_with(|_| async { Err(Error::cleanup_failed("device busy")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CleanupFailed);
        assert_eq!(lifecycle.state().await, LifecycleState::Running);

        lifecycle
            .stop_with(|container| async move {
                assert_eq!(container.id(), "abc");
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(lifecycle.state().await, LifecycleState::Stopped);

        let mut called = false;
        lifecycle
            .stop_with(|_| {
                called = true;
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert!(!called);
    }

    #[tokio::test]
    async fn test_double_bind_is_already_started() {
        let lifecycle = ContainerLifecycle::new("svc");
        lifecycle.bind(handle("a")).await.unwrap();
        let err = lifecycle.bind(handle("b")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyStarted);
    }

    #[tokio::test]
    async fn test_stopped_cannot_restart() {
        let lifecycle = ContainerLifecycle::running("svc", handle("a"));
        lifecycle.release().await;

        let err = lifecycle.bind(handle("b")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lifecycle);

        let err = lifecycle.handle("exec").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotStarted);
        assert_eq!(err.context()["current_state"], "stopped");
    }
}
