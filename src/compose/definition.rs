//! The compose definition handed to a [`ComposeEngine`](super::ComposeEngine).

use super::config::ComposeConfig;
use crate::wait::WaitStrategy;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// A compose file plus the configuration to run it with.
///
/// The directory and env file are made absolute against the current
/// directory on construction, so the compose CLI can run from anywhere.
#[derive(Debug, Clone)]
pub struct ComposeDefinition {
    path: PathBuf,
    file: String,
    config: ComposeConfig,
}

impl ComposeDefinition {
    pub fn new(path: impl Into<PathBuf>, file: impl Into<String>, mut config: ComposeConfig) -> Self {
        config.env_file = config.env_file.map(|env_file| absolutize(&env_file));
        Self {
            path: absolutize(&path.into()),
            file: file.into(),
            config,
        }
    }

    /// Directory containing the compose file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn compose_file(&self) -> PathBuf {
        self.path.join(&self.file)
    }

    pub fn config(&self) -> &ComposeConfig {
        &self.config
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.config.environment
    }

    pub fn project_name(&self) -> Option<&str> {
        self.config.project_name.as_deref()
    }

    pub fn wait_strategies(&self) -> &BTreeMap<String, WaitStrategy> {
        &self.config.wait_strategies
    }

    /// Add variables supplied by a service hook.
    ///
    /// Variables set on the builder take precedence.
    pub fn apply_environment(&mut self, vars: BTreeMap<String, String>) {
        for (key, value) in vars {
            self.config.environment.entry(key).or_insert(value);
        }
    }

    /// Use `strategy` for `service` unless the builder already set one.
    pub fn apply_wait_strategy(&mut self, service: &str, strategy: WaitStrategy) {
        if self.config.wait_strategies.contains_key(service) {
            debug!("Keeping builder wait strategy for {}", service);
            return;
        }
        self.config
            .wait_strategies
            .insert(service.to_string(), strategy);
    }

    /// Project name the compose CLI uses: the configured one, else the
    /// directory name, normalised.
    pub fn effective_project_name(&self) -> String {
        match &self.config.project_name {
            Some(name) => name.clone(),
            None => normalize_project_name(
                &self
                    .path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
        }
    }

    /// Default network compose creates for the project.
    pub fn network_name(&self) -> String {
        format!("{}_default", self.effective_project_name())
    }
}

/// `path` made absolute with `.` and `..` resolved lexically; symlinks are
/// left alone, as the compose CLI does.
fn absolutize(path: &Path) -> PathBuf {
    let Ok(absolute) = std::path::absolute(path) else {
        return path.to_path_buf();
    };
    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    resolved
}

/// Lower-case and drop characters compose does not allow in project names.
fn normalize_project_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
