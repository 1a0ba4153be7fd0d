//! Compose-level settings accumulated by [`ComposeBuilder`](super::ComposeBuilder).

use crate::container::PullPolicy;
use crate::wait::WaitStrategy;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Whether `up` recreates containers that already exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecreatePolicy {
    /// Recreate only containers whose configuration changed.
    #[default]
    Changed,
    /// `--force-recreate`
    Always,
    /// `--no-recreate`
    Never,
}

/// Images removed by `down`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveImages {
    All,
    /// Only images without a custom tag.
    Local,
}

impl RemoveImages {
    pub const fn as_str(self) -> &'static str {
        match self {
            RemoveImages::All => "all",
            RemoveImages::Local => "local",
        }
    }
}

/// Teardown options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownOptions {
    /// Remove named and anonymous volumes.
    pub remove_volumes: bool,
    pub remove_images: Option<RemoveImages>,
    /// Grace period before containers are killed.
    pub timeout: Option<Duration>,
}

impl Default for DownOptions {
    fn default() -> Self {
        Self {
            remove_volumes: true,
            remove_images: None,
            timeout: None,
        }
    }
}

/// Everything configured on a compose builder besides its services.
#[derive(Debug, Clone, Default)]
pub struct ComposeConfig {
    /// Variables visible to the compose file's interpolation.
    pub environment: BTreeMap<String, String>,
    pub env_file: Option<PathBuf>,
    /// Build images before starting containers.
    pub build: bool,
    pub profiles: Vec<String>,
    pub project_name: Option<String>,
    pub recreate: RecreatePolicy,
    /// Readiness check per compose service.
    pub wait_strategies: BTreeMap<String, WaitStrategy>,
    pub wait_timeout: Option<Duration>,
    pub pull_policy: Option<PullPolicy>,
    pub down: DownOptions,
}
