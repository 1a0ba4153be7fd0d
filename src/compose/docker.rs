//! [`ComposeEngine`] that drives the `docker compose` CLI.

use super::{ComposeDefinition, ComposeEngine, RecreatePolicy};
use crate::container::StartedContainer;
use crate::error::{Error, Result};
use crate::runtime::{ContainerRuntime, DockerRuntime, RuntimeResult};
use crate::settings::Settings;
use anyhow::bail;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt, io, process};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

const COMPOSE_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors running docker compose commands.
#[derive(Debug, thiserror::Error)]
pub enum ComposeCommandError {
    #[error("{command} exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: process::ExitStatus,
        stderr: String,
    },
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Compose engine backed by `docker compose`.
///
/// Containers it reports are driven through `runtime`, so wait strategies,
/// exec and logs work on them like on standalone containers.
#[derive(Clone)]
pub struct DockerComposeEngine {
    runtime: Arc<dyn ContainerRuntime>,
    binary: PathBuf,
    command_timeout: Duration,
}

impl DockerComposeEngine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, binary: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            binary: binary.into(),
            command_timeout: COMPOSE_COMMAND_TIMEOUT,
        }
    }

    /// Connect to the daemon and locate the docker CLI named by `settings`.
    ///
    /// # Errors
    ///
    /// Returns a daemon error when Docker cannot be reached and a
    /// missing-configuration error when the CLI is not installed.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let runtime = DockerRuntime::connect(settings).await?;
        let binary = which::which(&settings.docker_binary).map_err(|e| {
            Error::missing_configuration(
                "docker_binary",
                format!("docker CLI `{}` not found", settings.docker_binary),
            )
            .with_source(e)
        })?;
        Ok(Self::new(Arc::new(runtime), binary))
    }

    /// Limit on each compose command.
    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    async fn run(
        &self,
        definition: &ComposeDefinition,
        args: Vec<String>,
    ) -> std::result::Result<String, ComposeCommandError> {
        let description = format!("docker {}", args.join(" "));
        debug!("Running {}", description);

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .envs(definition.environment())
            .current_dir(definition.path())
            .kill_on_drop(true);
        if let Some(host) = self.runtime.docker_host() {
            command.env("DOCKER_HOST", host);
        }

        match timeout(self.command_timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(output)) => Err(ComposeCommandError::Failed {
                command: description,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Ok(Err(source)) => Err(ComposeCommandError::Spawn {
                command: description,
                source,
            }),
            Err(_) => Err(ComposeCommandError::Timeout {
                command: description,
                timeout: self.command_timeout,
            }),
        }
    }
}

impl fmt::Debug for DockerComposeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerComposeEngine")
            .field("binary", &self.binary)
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

/// `compose -f <file> [-p <project>] [--env-file <file>] [--profile <p>]...`
fn base_args(definition: &ComposeDefinition) -> Vec<String> {
    let config = definition.config();
    let mut args = vec![
        "compose".to_string(),
        "-f".to_string(),
        definition.compose_file().display().to_string(),
    ];
    if let Some(project) = definition.project_name() {
        args.push("-p".to_string());
        args.push(project.to_string());
    }
    if let Some(env_file) = &config.env_file {
        args.push("--env-file".to_string());
        args.push(env_file.display().to_string());
    }
    for profile in &config.profiles {
        args.push("--profile".to_string());
        args.push(profile.clone());
    }
    args
}

fn up_args(definition: &ComposeDefinition) -> Vec<String> {
    let config = definition.config();
    let mut args = base_args(definition);
    args.push("up".to_string());
    args.push("-d".to_string());
    if config.build {
        args.push("--build".to_string());
    }
    if let Some(policy) = config.pull_policy {
        args.push("--pull".to_string());
        args.push(policy.as_str().to_string());
    }
    match config.recreate {
        RecreatePolicy::Changed => {}
        RecreatePolicy::Always => args.push("--force-recreate".to_string()),
        RecreatePolicy::Never => args.push("--no-recreate".to_string()),
    }
    args
}

fn down_args(definition: &ComposeDefinition) -> Vec<String> {
    let down = &definition.config().down;
    let mut args = base_args(definition);
    args.push("down".to_string());
    if down.remove_volumes {
        args.push("--volumes".to_string());
    }
    if let Some(images) = down.remove_images {
        args.push("--rmi".to_string());
        args.push(images.as_str().to_string());
    }
    if let Some(grace) = down.timeout {
        args.push("--timeout".to_string());
        args.push(grace.as_secs().to_string());
    }
    args
}

#[async_trait]
impl ComposeEngine for DockerComposeEngine {
    async fn up(&self, definition: &ComposeDefinition) -> RuntimeResult<()> {
        let file = definition.compose_file();
        if !file.is_file() {
            bail!("compose file {} does not exist", file.display());
        }

        info!("Starting compose project {}", definition.effective_project_name());
        self.run(definition, up_args(definition)).await?;
        Ok(())
    }

    async fn down(&self, definition: &ComposeDefinition) -> RuntimeResult<()> {
        info!("Stopping compose project {}", definition.effective_project_name());
        self.run(definition, down_args(definition)).await?;
        Ok(())
    }

    async fn container(
        &self,
        definition: &ComposeDefinition,
        service: &str,
    ) -> RuntimeResult<Option<StartedContainer>> {
        let mut args = base_args(definition);
        args.extend(["ps".to_string(), "-q".to_string(), service.to_string()]);

        let stdout = self.run(definition, args).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(|id| StartedContainer::new(id, service, None, self.runtime.clone())))
    }

    async fn services(&self, definition: &ComposeDefinition) -> RuntimeResult<Vec<String>> {
        let mut args = base_args(definition);
        args.extend(["config".to_string(), "--services".to_string()]);

        let stdout = self.run(definition, args).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{ComposeConfig, DownOptions, RemoveImages};
    use crate::container::PullPolicy;

    fn definition(config: ComposeConfig) -> ComposeDefinition {
        ComposeDefinition::new("/srv/stack", "compose.yml", config)
    }

    #[test]
    fn test_up_args() {
        let config = ComposeConfig {
            project_name: Some("itest".into()),
            env_file: Some("/srv/stack/.env.test".into()),
            profiles: vec!["db".into()],
            build: true,
            pull_policy: Some(PullPolicy::Always),
            recreate: RecreatePolicy::Always,
            ..Default::default()
        };

        assert_eq!(
            up_args(&definition(config)),
            vec![
                "compose",
                "-f",
                "/srv/stack/compose.yml",
                "-p",
                "itest",
                "--env-file",
                "/srv/stack/.env.test",
                "--profile",
                "db",
                "up",
                "-d",
                "--build",
                "--pull",
                "always",
                "--force-recreate",
            ]
        );
    }

    #[test]
    fn test_down_args() {
        let config = ComposeConfig {
            down: DownOptions {
                remove_volumes: true,
                remove_images: Some(RemoveImages::Local),
                timeout: Some(Duration::from_secs(5)),
            },
            ..Default::default()
        };

        assert_eq!(
            down_args(&definition(config)),
            vec![
                "compose",
                "-f",
                "/srv/stack/compose.yml",
                "down",
                "--volumes",
                "--rmi",
                "local",
                "--timeout",
                "5",
            ]
        );
    }

    #[test]
    fn test_default_down_keeps_images() {
        let args = down_args(&definition(ComposeConfig::default()));
        assert!(args.contains(&"--volumes".to_string()));
        assert!(!args.contains(&"--rmi".to_string()));
    }

    /// A `docker` stand-in that logs `cwd|args` and fails unless the `-f`
    /// argument names an existing file.
    #[cfg(unix)]
    fn fake_docker(dir: &std::path::Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("docker");
        std::fs::write(
            &script,
            "#!/bin/sh\necho \"$PWD|$*\" >> \"$(dirname \"$0\")/calls.log\"\ntest -f \"$3\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relative_compose_directory() {
        let bin = tempfile::tempdir().unwrap();
        let docker = fake_docker(bin.path());

        // tempdir_in(".") yields a path relative to the working directory.
        let stack = tempfile::tempdir_in(".").unwrap();
        assert!(stack.path().is_relative());
        std::fs::write(stack.path().join("compose.yml"), "services: {}\n").unwrap();

        let runtime = Arc::new(crate::runtime::RecordingRuntime::new());
        let engine = DockerComposeEngine::new(runtime, &docker);
        let definition = ComposeDefinition::new(stack.path(), "compose.yml", ComposeConfig::default());

        engine.up(&definition).await.unwrap();

        let log = std::fs::read_to_string(bin.path().join("calls.log")).unwrap();
        let (cwd, args) = log.trim().split_once('|').unwrap();
        let expected_dir = std::fs::canonicalize(stack.path()).unwrap();
        assert_eq!(std::fs::canonicalize(cwd).unwrap(), expected_dir);
        assert!(args.starts_with("compose -f /"), "unexpected args: {args}");
        assert!(args.ends_with("compose.yml up -d"), "unexpected args: {args}");
    }
}
