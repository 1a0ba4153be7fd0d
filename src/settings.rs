//! Process-wide settings.
//!
//! Settings are discovered in this order, first match wins:
//! 1. The file named by `$TESTENV_CONFIG`
//! 2. `./testenv.toml`
//! 3. `$HOME/.testenv.toml`
//! 4. Built-in defaults
//!
//! Environment overrides are applied on top of whichever source was used.

use crate::env::{self, vars};
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error as ThisError;
use tracing::{debug, info};

#[derive(Debug, ThisError)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value '{value}' for {key}")]
    InvalidEnv { key: String, value: String },
}

impl SettingsError {
    fn field(&self) -> String {
        match self {
            SettingsError::Io { path, .. } | SettingsError::Parse { path, .. } => {
                path.display().to_string()
            }
            SettingsError::InvalidEnv { key, .. } => key.clone(),
        }
    }
}

impl From<SettingsError> for Error {
    fn from(err: SettingsError) -> Self {
        match &err {
            SettingsError::InvalidEnv { key, value } => {
                let message = format!("invalid value '{value}' for {key}");
                Error::invalid_environment(key.clone(), message).with_source(err)
            }
            SettingsError::Io { .. } | SettingsError::Parse { .. } => {
                Error::configuration(err.field(), err.to_string()).with_source(err)
            }
        }
    }
}

/// Settings shared by every builder that was not given its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Daemon address; the platform default socket when unset.
    pub docker_host: Option<String>,
    pub startup_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    /// Allow builders that ask for reuse to adopt an existing container.
    pub reuse_enabled: bool,
    /// docker CLI used for image builds, file copies and compose.
    pub docker_binary: String,
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docker_host: None,
            startup_timeout_secs: 60,
            stop_timeout_secs: 10,
            reuse_enabled: false,
            docker_binary: "docker".to_string(),
            poll_interval_ms: 100,
        }
    }
}

impl Settings {
    /// Load settings from the discovery hierarchy and the process environment.
    pub fn discover() -> Result<Self, SettingsError> {
        let lookup = |key: &str| std_env::var(key).ok();

        let mut settings = match Self::find_config_file(&lookup) {
            Some(path) => {
                info!("Loading testenv settings from {:?}", path);
                Self::from_toml_file(&path)?
            }
            None => {
                debug!("No testenv settings file found, using defaults");
                Self::default()
            }
        };
        settings.apply_env(lookup)?;
        Ok(settings)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides read through `lookup`, normally [`std::env::var`].
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(vars::DOCKER_HOST).or_else(|| lookup(vars::DOCKER_HOST_FALLBACK))
        {
            self.docker_host = Some(host);
        }
        if let Some(secs) = parse_var(&lookup, vars::STARTUP_TIMEOUT_SECS)? {
            self.startup_timeout_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, vars::STOP_TIMEOUT_SECS)? {
            self.stop_timeout_secs = secs;
        }
        if let Some(value) = lookup(vars::REUSE_ENABLE) {
            self.reuse_enabled = parse_bool(vars::REUSE_ENABLE, &value)?;
        }
        if let Some(binary) = lookup(vars::DOCKER_BINARY) {
            self.docker_binary = binary;
        }
        Ok(())
    }

    /// Candidate files in priority order.
    pub fn config_candidates<F>(lookup: F) -> Vec<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut candidates = Vec::new();

        if let Some(explicit) = lookup(vars::CONFIG) {
            candidates.push(PathBuf::from(explicit));
        }
        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(env::local_config_file_path(&current_dir));
        }
        if let Some(home) = lookup("HOME").or_else(|| lookup("USERPROFILE")) {
            candidates.push(env::user_config_file_path(Path::new(&home)));
        }

        candidates
    }

    fn find_config_file<F>(lookup: F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::config_candidates(lookup).into_iter().find(|candidate| {
            debug!("Checking for settings file: {:?}", candidate);
            candidate.is_file()
        })
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_var<F>(lookup: &F, key: &str) -> Result<Option<u64>, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value.trim().parse().map_err(|_| SettingsError::InvalidEnv {
                key: key.to_string(),
                value,
            })
        })
        .transpose()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(SettingsError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
