//! In-memory [`ContainerRuntime`] that records every call.
//!
//! Containers "start" instantly, ports are assigned from 32768 upwards in
//! creation order, and any operation can be scripted to fail.

use super::{
    BuildFailure, BuildFailureReason, ContainerRuntime, ContainerSummary, HealthStatus, LogLine,
    LogStream, RuntimeResult,
};
use crate::container::{BuildSpec, ContainerRequest, CopyToContainer, ExecConfig, ExecOutput, ExposedPort};
use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

const FIRST_HOST_PORT: u16 = 32768;

/// Operations of [`ContainerRuntime`], as recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    ImageExists,
    PullImage,
    BuildImage,
    FindContainer,
    CreateContainer,
    CopyToContainer,
    StartContainer,
    IsRunning,
    MappedPort,
    Exec,
    Logs,
    LogStream,
    Health,
    RestartContainer,
    IpAddress,
    CreateNetwork,
    RemoveNetwork,
    RemoveContainer,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCall {
    pub op: RuntimeOp,
    /// Main argument of the call: image, container id, command line...
    pub detail: String,
}

#[derive(Debug)]
struct RecordedContainer {
    request: ContainerRequest,
    ports: BTreeMap<ExposedPort, u16>,
    removed: bool,
}

#[derive(Debug)]
struct State {
    calls: Vec<RuntimeCall>,
    failures: HashMap<RuntimeOp, String>,
    build_failure: Option<BuildFailure>,
    images: BTreeSet<String>,
    unmapped: BTreeSet<u16>,
    exec_outputs: VecDeque<ExecOutput>,
    logs: String,
    health: HealthStatus,
    exited: bool,
    containers: BTreeMap<String, RecordedContainer>,
    existing: Vec<(ContainerSummary, BTreeMap<String, String>)>,
    networks: BTreeMap<String, String>,
    next_id: u64,
    next_port: u16,
}

/// Scriptable runtime for tests that must run without a daemon.
#[derive(Debug)]
pub struct RecordingRuntime {
    state: Mutex<State>,
}

impl Default for RecordingRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                calls: Vec::new(),
                failures: HashMap::new(),
                build_failure: None,
                images: BTreeSet::new(),
                unmapped: BTreeSet::new(),
                exec_outputs: VecDeque::new(),
                logs: String::new(),
                health: HealthStatus::Healthy,
                exited: false,
                containers: BTreeMap::new(),
                existing: Vec::new(),
                networks: BTreeMap::new(),
                next_id: 1,
                next_port: FIRST_HOST_PORT,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every later call of `op` fail with `message`.
    pub fn fail(&self, op: RuntimeOp, message: impl Into<String>) {
        self.state().failures.insert(op, message.into());
    }

    /// Let `op` succeed again after [`RecordingRuntime::fail`].
    pub fn recover(&self, op: RuntimeOp) {
        self.state().failures.remove(&op);
    }

    /// Make image builds fail with `failure`.
    pub fn fail_build(&self, failure: BuildFailure) {
        self.state().build_failure = Some(failure);
    }

    /// Pretend `image` is already present locally.
    pub fn with_image(&self, image: impl Into<String>) {
        self.state().images.insert(image.into());
    }

    /// Leave container port `port` without a host mapping.
    pub fn with_unmapped_port(&self, port: u16) {
        self.state().unmapped.insert(port);
    }

    /// Register a container that `find_container` can discover.
    pub fn with_existing(&self, summary: ContainerSummary, labels: BTreeMap<String, String>) {
        self.state().existing.push((summary, labels));
    }

    /// Output returned by the next `exec`; later calls get the next queued one.
    pub fn push_exec_output(&self, output: ExecOutput) {
        self.state().exec_outputs.push_back(output);
    }

    pub fn set_logs(&self, logs: impl Into<String>) {
        self.state().logs = logs.into();
    }

    pub fn set_health(&self, health: HealthStatus) {
        self.state().health = health;
    }

    /// Report every container as no longer running.
    pub fn set_exited(&self, exited: bool) {
        self.state().exited = exited;
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state().calls.clone()
    }

    pub fn ops(&self) -> Vec<RuntimeOp> {
        self.state().calls.iter().map(|call| call.op).collect()
    }

    /// Every request passed to `create_container`, in order.
    pub fn requests(&self) -> Vec<ContainerRequest> {
        let state = self.state();
        let mut ids: Vec<&String> = state.containers.keys().collect();
        ids.sort_by_key(|id| id.trim_start_matches("container-").parse::<u64>().unwrap_or(0));
        ids.into_iter()
            .filter_map(|id| state.containers.get(id))
            .map(|container| container.request.clone())
            .collect()
    }

    fn record(&self, op: RuntimeOp, detail: impl Into<String>) -> RuntimeResult<()> {
        let mut state = self.state();
        state.calls.push(RuntimeCall {
            op,
            detail: detail.into(),
        });
        match state.failures.get(&op) {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    fn host(&self) -> String {
        "localhost".to_string()
    }

    async fn image_exists(&self, image: &str) -> RuntimeResult<bool> {
        self.record(RuntimeOp::ImageExists, image)?;
        Ok(self.state().images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        self.record(RuntimeOp::PullImage, image)?;
        self.state().images.insert(image.to_string());
        Ok(())
    }

    async fn build_image(&self, spec: &BuildSpec, tag: &str) -> Result<(), BuildFailure> {
        self.record(RuntimeOp::BuildImage, spec.context.display().to_string())
            .map_err(|e| BuildFailure::new(BuildFailureReason::Other, e.to_string()))?;

        let mut state = self.state();
        if let Some(failure) = &state.build_failure {
            return Err(failure.clone());
        }
        state.images.insert(tag.to_string());
        Ok(())
    }

    async fn find_container(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> RuntimeResult<Option<ContainerSummary>> {
        self.record(RuntimeOp::FindContainer, format!("{labels:?}"))?;
        let state = self.state();
        Ok(state
            .existing
            .iter()
            .find(|(_, existing)| labels.iter().all(|(k, v)| existing.get(k) == Some(v)))
            .map(|(summary, _)| summary.clone()))
    }

    async fn create_container(&self, request: &ContainerRequest) -> RuntimeResult<String> {
        self.record(RuntimeOp::CreateContainer, request.image.clone())?;

        let mut state = self.state();
        let id = format!("container-{}", state.next_id);
        state.next_id += 1;

        let mut ports = BTreeMap::new();
        for port in &request.exposed_ports {
            if state.unmapped.contains(&port.port()) {
                continue;
            }
            ports.insert(*port, state.next_port);
            state.next_port += 1;
        }

        state.containers.insert(
            id.clone(),
            RecordedContainer {
                request: request.clone(),
                ports,
                removed: false,
            },
        );
        Ok(id)
    }

    async fn copy_to_container(&self, id: &str, copy: &CopyToContainer) -> RuntimeResult<()> {
        self.record(
            RuntimeOp::CopyToContainer,
            format!("{}:{}", id, copy.target),
        )
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.record(RuntimeOp::StartContainer, id)
    }

    async fn is_running(&self, id: &str) -> RuntimeResult<bool> {
        self.record(RuntimeOp::IsRunning, id)?;
        let state = self.state();
        let removed = state.containers.get(id).is_some_and(|c| c.removed);
        Ok(!state.exited && !removed)
    }

    async fn mapped_port(&self, id: &str, port: ExposedPort) -> RuntimeResult<Option<u16>> {
        self.record(RuntimeOp::MappedPort, format!("{id}:{port}"))?;
        let state = self.state();
        Ok(state
            .containers
            .get(id)
            .and_then(|container| container.ports.get(&port).copied()))
    }

    async fn exec(&self, id: &str, config: &ExecConfig) -> RuntimeResult<ExecOutput> {
        self.record(RuntimeOp::Exec, format!("{id}:{}", config.cmd().join(" ")))?;
        Ok(self.state().exec_outputs.pop_front().unwrap_or(ExecOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
        }))
    }

    async fn logs(&self, id: &str) -> RuntimeResult<String> {
        self.record(RuntimeOp::Logs, id)?;
        Ok(self.state().logs.clone())
    }

    fn log_stream(&self, id: &str, _follow: bool) -> LogStream {
        if let Err(e) = self.record(RuntimeOp::LogStream, id) {
            return stream::iter(vec![Err(e)]).boxed();
        }
        let lines: Vec<RuntimeResult<LogLine>> = self
            .state()
            .logs
            .lines()
            .map(|line| Ok(LogLine::Stdout(line.to_string())))
            .collect();
        stream::iter(lines).boxed()
    }

    async fn health(&self, id: &str) -> RuntimeResult<HealthStatus> {
        self.record(RuntimeOp::Health, id)?;
        Ok(self.state().health)
    }

    async fn restart_container(&self, id: &str) -> RuntimeResult<()> {
        self.record(RuntimeOp::RestartContainer, id)
    }

    async fn ip_address(&self, id: &str, network: &str) -> RuntimeResult<Option<String>> {
        self.record(RuntimeOp::IpAddress, format!("{id}:{network}"))?;
        let state = self.state();
        let attached = state
            .containers
            .get(id)
            .is_some_and(|c| c.request.network.as_deref() == Some(network));
        let position = state.containers.keys().position(|key| key == id).unwrap_or(0);
        Ok(attached.then(|| format!("172.18.0.{}", position + 2)))
    }

    async fn create_network(
        &self,
        name: &str,
        _labels: &BTreeMap<String, String>,
    ) -> RuntimeResult<String> {
        self.record(RuntimeOp::CreateNetwork, name)?;
        let mut state = self.state();
        let id = format!("network-{}", state.next_id);
        state.next_id += 1;
        state.networks.insert(id.clone(), name.to_string());
        Ok(id)
    }

    async fn remove_network(&self, id: &str) -> RuntimeResult<()> {
        self.record(RuntimeOp::RemoveNetwork, id)?;
        self.state().networks.remove(id);
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        self.record(RuntimeOp::RemoveContainer, id)?;
        if let Some(container) = self.state().containers.get_mut(id) {
            container.removed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ports_assigned_in_order() {
        let runtime = RecordingRuntime::new();
        runtime.with_unmapped_port(9000);

        let request = ContainerRequest {
            name: None,
            image: "redis:7".into(),
            cmd: None,
            entrypoint: None,
            env: BTreeMap::new(),
            working_dir: None,
            user: None,
            labels: BTreeMap::new(),
            resources: Default::default(),
            cap_add: Vec::new(),
            cap_drop: Vec::new(),
            privileged: false,
            network: None,
            exposed_ports: vec![
                ExposedPort::tcp(6379).unwrap(),
                ExposedPort::tcp(9000).unwrap(),
            ],
        };
        let id = runtime.create_container(&request).await.unwrap();

        let redis = runtime
            .mapped_port(&id, ExposedPort::tcp(6379).unwrap())
            .await
            .unwrap();
        let unmapped = runtime
            .mapped_port(&id, ExposedPort::tcp(9000).unwrap())
            .await
            .unwrap();
        assert_eq!(redis, Some(FIRST_HOST_PORT));
        assert_eq!(unmapped, None);
        assert_eq!(runtime.requests(), vec![request]);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let runtime = RecordingRuntime::new();
        runtime.fail(RuntimeOp::PullImage, "registry unreachable");

        let err = runtime.pull_image("redis:7").await.unwrap_err();
        assert_eq!(err.to_string(), "registry unreachable");
        assert_eq!(
            runtime.calls(),
            vec![RuntimeCall {
                op: RuntimeOp::PullImage,
                detail: "redis:7".into()
            }]
        );
    }
}
