//! In-memory [`ComposeEngine`].
//!
//! `up` creates one container per declared service through the given
//! runtime, so handles behave like real ones when that runtime is a
//! [`RecordingRuntime`](crate::runtime::RecordingRuntime).

use super::{ComposeDefinition, ComposeEngine};
use crate::container::{ContainerRequest, StartedContainer};
use crate::runtime::{ContainerRuntime, RuntimeResult};
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Operations of [`ComposeEngine`], as recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComposeOp {
    Up,
    Down,
    Container,
    Services,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<(ComposeOp, String)>,
    failures: HashMap<ComposeOp, String>,
    running: BTreeMap<String, String>,
    definitions: Vec<ComposeDefinition>,
    missing: Vec<String>,
}

/// Compose engine that records calls and can be scripted to fail.
#[derive(Debug)]
pub struct RecordingComposeEngine {
    runtime: Arc<dyn ContainerRuntime>,
    services: Vec<String>,
    state: Mutex<State>,
}

impl RecordingComposeEngine {
    /// Engine whose compose file declares `services`.
    pub fn new<I, S>(runtime: Arc<dyn ContainerRuntime>, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            runtime,
            services: services.into_iter().map(Into::into).collect(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, op: ComposeOp, detail: impl Into<String>) -> RuntimeResult<()> {
        let mut state = self.state();
        state.calls.push((op, detail.into()));
        match state.failures.get(&op) {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }

    /// Make every later call of `op` fail with `message`.
    pub fn fail(&self, op: ComposeOp, message: impl Into<String>) {
        self.state().failures.insert(op, message.into());
    }

    /// `up` leaves `service` without a container.
    pub fn without_container(&self, service: impl Into<String>) {
        self.state().missing.push(service.into());
    }

    pub fn ops(&self) -> Vec<ComposeOp> {
        self.state().calls.iter().map(|(op, _)| *op).collect()
    }

    pub fn calls(&self) -> Vec<(ComposeOp, String)> {
        self.state().calls.clone()
    }

    /// Definitions passed to `up`, in call order.
    pub fn definitions(&self) -> Vec<ComposeDefinition> {
        self.state().definitions.clone()
    }

    fn request(definition: &ComposeDefinition, service: &str) -> ContainerRequest {
        let project = definition.effective_project_name();
        ContainerRequest {
            name: Some(format!("{project}-{service}-1")),
            image: format!("{project}-{service}"),
            cmd: None,
            entrypoint: None,
            env: definition.environment().clone(),
            working_dir: None,
            user: None,
            labels: BTreeMap::from([
                ("com.docker.compose.project".to_string(), project),
                ("com.docker.compose.service".to_string(), service.to_string()),
            ]),
            resources: Default::default(),
            cap_add: Vec::new(),
            cap_drop: Vec::new(),
            privileged: false,
            network: Some(definition.network_name()),
            exposed_ports: Vec::new(),
        }
    }
}

#[async_trait]
impl ComposeEngine for RecordingComposeEngine {
    async fn up(&self, definition: &ComposeDefinition) -> RuntimeResult<()> {
        self.record(ComposeOp::Up, definition.compose_file().display().to_string())?;
        self.state().definitions.push(definition.clone());

        let missing = self.state().missing.clone();
        for service in self.services.iter().filter(|s| !missing.contains(s)) {
            let id = self
                .runtime
                .create_container(&Self::request(definition, service))
                .await?;
            self.runtime.start_container(&id).await?;
            self.state().running.insert(service.clone(), id);
        }
        Ok(())
    }

    async fn down(&self, definition: &ComposeDefinition) -> RuntimeResult<()> {
        self.record(ComposeOp::Down, definition.compose_file().display().to_string())?;

        let running = std::mem::take(&mut self.state().running);
        for id in running.values() {
            self.runtime.remove_container(id).await?;
        }
        Ok(())
    }

    async fn container(
        &self,
        _definition: &ComposeDefinition,
        service: &str,
    ) -> RuntimeResult<Option<StartedContainer>> {
        self.record(ComposeOp::Container, service)?;
        let id = self.state().running.get(service).cloned();
        Ok(id.map(|id| StartedContainer::new(id, service, None, self.runtime.clone())))
    }

    async fn services(&self, definition: &ComposeDefinition) -> RuntimeResult<Vec<String>> {
        self.record(ComposeOp::Services, definition.compose_file().display().to_string())?;
        Ok(self.services.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::ComposeConfig;
    use crate::runtime::RecordingRuntime;

    fn definition() -> ComposeDefinition {
        let config = ComposeConfig {
            project_name: Some("itest".into()),
            ..Default::default()
        };
        ComposeDefinition::new("/srv/stack", "compose.yml", config)
    }

    #[tokio::test]
    async fn test_up_starts_declared_services() {
        let runtime = Arc::new(RecordingRuntime::new());
        let engine = RecordingComposeEngine::new(runtime.clone(), ["db", "cache"]);

        engine.up(&definition()).await.unwrap();

        let db = engine.container(&definition(), "db").await.unwrap().unwrap();
        assert_eq!(db.name(), "db");
        assert!(db.is_running().await.unwrap());
        assert!(engine.container(&definition(), "ghost").await.unwrap().is_none());
        assert_eq!(
            runtime.requests()[0].labels["com.docker.compose.service"],
            "db"
        );
    }

    #[tokio::test]
    async fn test_down_removes_containers() {
        let runtime = Arc::new(RecordingRuntime::new());
        let engine = RecordingComposeEngine::new(runtime.clone(), ["db"]);
        engine.up(&definition()).await.unwrap();
        let db = engine.container(&definition(), "db").await.unwrap().unwrap();

        engine.down(&definition()).await.unwrap();

        assert!(!db.is_running().await.unwrap());
        assert!(engine.container(&definition(), "db").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let runtime = Arc::new(RecordingRuntime::new());
        let engine = RecordingComposeEngine::new(runtime, ["db"]);
        engine.fail(ComposeOp::Up, "port is already allocated");

        let err = engine.up(&definition()).await.unwrap_err();
        assert_eq!(err.to_string(), "port is already allocated");
        assert_eq!(engine.ops(), vec![ComposeOp::Up]);
    }
}
