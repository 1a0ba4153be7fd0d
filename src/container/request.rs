//! Translation of a [`ContainerConfig`] into what the runtime is asked to do.
//!
//! [`LaunchPlan::new`] is pure: it validates the record, resolves the image,
//! and produces the exact [`ContainerRequest`] passed to
//! [`ContainerRuntime::create_container`](crate::runtime::ContainerRuntime::create_container).
//! Conditions that degrade instead of failing are collected as warnings.

use super::{
    BuildSpec, ContainerConfig, CopyToContainer, ExposedPort, ImageSource, NetworkRef, PullPolicy,
    ResourceLimits,
};
use crate::env::labels;
use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::wait::WaitStrategy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

/// `[registry[:port]/]path[:tag][@digest]`, lower-case path components.
static IMAGE_REFERENCE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[a-zA-Z0-9.-]+(?::[0-9]+)?/)?[a-z0-9]+(?:[._-]+[a-z0-9]+)*(?:/[a-z0-9]+(?:[._-]+[a-z0-9]+)*)*(?::[\w][\w.-]{0,127})?(?:@[a-z0-9]+:[a-fA-F0-9]{32,})?$",
    )
});

/// Container creation request, independent of any runtime client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerRequest {
    pub name: Option<String>,
    pub image: String,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub resources: ResourceLimits,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub privileged: bool,
    /// Name of a network created through the runtime.
    pub network: Option<String>,
    pub exposed_ports: Vec<ExposedPort>,
}

impl ContainerRequest {
    /// `KEY=value` pairs, as the Docker API expects them.
    pub fn env_pairs(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    /// Stable hash of everything that defines the container.
    ///
    /// Two requests with the same hash would create interchangeable
    /// containers, so a running container carrying the hash can be reused.
    pub fn reuse_hash(&self) -> Result<String> {
        let mut unlabelled = self.clone();
        unlabelled.labels.remove(labels::REUSE_HASH);
        let bytes = serde_json::to_vec(&unlabelled).map_err(|e| {
            Error::validation("reuse", "request must serialize", "failed to hash container request")
                .with_source(e)
        })?;
        Ok(uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, &bytes).to_string())
    }
}

/// How the image is obtained before the container is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePlan {
    Pull {
        reference: String,
        policy: PullPolicy,
    },
    Build {
        spec: BuildSpec,
        tag: String,
    },
}

impl ImagePlan {
    /// The reference the container will be created from.
    pub fn reference(&self) -> &str {
        match self {
            ImagePlan::Pull { reference, .. } => reference,
            ImagePlan::Build { tag, .. } => tag,
        }
    }
}

/// Ordered description of everything `start()` will do.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub image: ImagePlan,
    pub request: ContainerRequest,
    pub copies: Vec<CopyToContainer>,
    pub wait_strategy: Option<WaitStrategy>,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    /// Adopt a running container with the same reuse hash.
    pub reuse: bool,
    pub warnings: Vec<String>,
}

impl LaunchPlan {
    /// Translate `config` for `image`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty or malformed image
    /// reference, or a validation error for inconsistent fields.
    pub fn new(image: &ImageSource, config: &ContainerConfig, settings: &Settings) -> Result<Self> {
        let mut warnings = Vec::new();

        let image = match image {
            ImageSource::Reference(reference) => {
                validate_image_reference(reference)?;
                ImagePlan::Pull {
                    reference: reference.clone(),
                    policy: config.pull_policy,
                }
            }
            ImageSource::Build(spec) => {
                let tag = match &spec.tag {
                    Some(tag) => {
                        validate_image_reference(tag)?;
                        tag.clone()
                    }
                    None => format!("testenv-build:{}", uuid::Uuid::new_v4().simple()),
                };
                ImagePlan::Build {
                    spec: spec.clone(),
                    tag,
                }
            }
        };

        if let Some(name) = &config.name
            && name.trim().is_empty()
        {
            return Err(Error::invalid_value("name", "container name must not be empty", name));
        }

        for copy in &config.copy_to_container {
            if !copy.target.starts_with('/') {
                return Err(Error::invalid_value(
                    "copy_to_container",
                    "target must be an absolute path",
                    &copy.target,
                ));
            }
        }

        let network = match &config.network {
            Some(NetworkRef::Handle(network)) => Some(network.name().to_string()),
            Some(NetworkRef::Name(name)) => {
                let warning = format!(
                    "network '{name}' was given by name only and will not be joined; pass a Network created through the runtime"
                );
                warn!("{}", warning);
                warnings.push(warning);
                None
            }
            None => None,
        };

        let reuse = match (config.reuse, settings.reuse_enabled) {
            (true, true) => true,
            (true, false) => {
                let warning = "container reuse was requested but is disabled in settings; starting a fresh container".to_string();
                warn!("{}", warning);
                warnings.push(warning);
                false
            }
            (false, _) => false,
        };

        let mut request_labels = config.labels.clone();
        request_labels.insert(labels::MANAGED.to_string(), "true".to_string());

        let mut request = ContainerRequest {
            name: config.name.clone(),
            image: image.reference().to_string(),
            cmd: config.command.clone(),
            entrypoint: config.entrypoint.clone(),
            env: config.env.clone(),
            working_dir: config.working_dir.clone(),
            user: config.user.clone(),
            labels: request_labels,
            resources: config.resources,
            cap_add: config.cap_add.clone(),
            cap_drop: config.cap_drop.clone(),
            privileged: config.privileged,
            network,
            exposed_ports: config.exposed_ports.clone(),
        };

        if reuse {
            let hash = request.reuse_hash()?;
            request.labels.insert(labels::REUSE_HASH.to_string(), hash);
        }

        debug!(
            "Launch plan for {}: {} port(s), {} copy instruction(s)",
            request.image,
            request.exposed_ports.len(),
            config.copy_to_container.len()
        );

        Ok(Self {
            image,
            request,
            copies: config.copy_to_container.clone(),
            wait_strategy: config.wait_strategy.clone(),
            startup_timeout: config
                .startup_timeout
                .unwrap_or_else(|| settings.startup_timeout()),
            poll_interval: settings.poll_interval(),
            reuse,
            warnings,
        })
    }
}

/// Reject empty and syntactically invalid image references.
pub fn validate_image_reference(reference: &str) -> Result<()> {
    if reference.trim().is_empty() {
        return Err(Error::invalid_image(reference, "image reference must not be empty"));
    }
    let pattern = IMAGE_REFERENCE.as_ref().map_err(|e| {
        Error::validation("image", "reference pattern", "image reference pattern failed to compile")
            .with_source(e.clone())
    })?;
    if !pattern.is_match(reference) {
        return Err(Error::invalid_image(
            reference,
            format!("'{reference}' is not a valid image reference"),
        ));
    }
    Ok(())
}

/// Registry host of an image reference, when it names one explicitly.
pub fn registry_of(reference: &str) -> Option<String> {
    let (first, rest) = reference.split_once('/')?;
    if rest.is_empty() {
        return None;
    }
    let looks_like_host = first.contains('.') || first.contains(':') || first == "localhost";
    looks_like_host.then(|| first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn plan(config: &ContainerConfig) -> Result<LaunchPlan> {
        LaunchPlan::new(
            &ImageSource::Reference("redis:7-alpine".into()),
            config,
            &Settings::default(),
        )
    }

    #[test]
    fn test_image_reference_validation() {
        for valid in [
            "redis",
            "redis:7-alpine",
            "library/postgres:16",
            "ghcr.io/org/app:1.2.3",
            "localhost:5000/app",
        ] {
            assert!(validate_image_reference(valid).is_ok(), "{valid}");
        }

        for invalid in ["", "  ", "Redis", "redis:", "bad image"] {
            let err = validate_image_reference(invalid).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidImage, "{invalid}");
        }
    }

    #[test]
    fn test_registry_of() {
        assert_eq!(registry_of("redis:7"), None);
        assert_eq!(registry_of("library/redis"), None);
        assert_eq!(registry_of("ghcr.io/org/app"), Some("ghcr.io".into()));
        assert_eq!(registry_of("localhost:5000/app"), Some("localhost:5000".into()));
    }

    #[test]
    fn test_translation_copies_fields() {
        let mut config = ContainerConfig::default();
        config.env.insert("A".into(), "1".into());
        config.working_dir = Some("/srv".into());
        config.exposed_ports.push(ExposedPort::tcp(6379).unwrap());

        let plan = plan(&config).unwrap();
        assert_eq!(plan.request.image, "redis:7-alpine");
        assert_eq!(plan.request.env_pairs(), vec!["A=1".to_string()]);
        assert_eq!(plan.request.working_dir.as_deref(), Some("/srv"));
        assert_eq!(plan.request.labels.get(labels::MANAGED).map(String::as_str), Some("true"));
        assert_eq!(plan.startup_timeout, Duration::from_secs(60));
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_bare_network_name_is_warned_and_dropped() {
        let config = ContainerConfig {
            network: Some("backend".into()),
            ..Default::default()
        };

        let plan = plan(&config).unwrap();
        assert_eq!(plan.request.network, None);
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("backend"));
    }

    #[test]
    fn test_reuse_requires_settings() {
        let config = ContainerConfig {
            reuse: true,
            ..Default::default()
        };

        let disabled = plan(&config).unwrap();
        assert!(!disabled.reuse);
        assert!(!disabled.request.labels.contains_key(labels::REUSE_HASH));

        let settings = Settings {
            reuse_enabled: true,
            ..Default::default()
        };
        let enabled = LaunchPlan::new(
            &ImageSource::Reference("redis:7-alpine".into()),
            &config,
            &settings,
        )
        .unwrap();
        assert!(enabled.reuse);

        let again = LaunchPlan::new(
            &ImageSource::Reference("redis:7-alpine".into()),
            &config,
            &settings,
        )
        .unwrap();
        assert_eq!(
            enabled.request.labels.get(labels::REUSE_HASH),
            again.request.labels.get(labels::REUSE_HASH)
        );
    }

    #[test]
    fn test_build_plan_generates_tag() {
        let plan = LaunchPlan::new(
            &ImageSource::Build(BuildSpec::new("/src/app")),
            &ContainerConfig::default(),
            &Settings::default(),
        )
        .unwrap();

        match &plan.image {
            ImagePlan::Build { tag, .. } => assert!(tag.starts_with("testenv-build:")),
            other => panic!("expected build plan, got {other:?}"),
        }
        assert_eq!(plan.request.image, plan.image.reference());
    }

    #[test]
    fn test_relative_copy_target_rejected() {
        let config = ContainerConfig {
            copy_to_container: vec![CopyToContainer::new("/tmp/init.sql", "init.sql")],
            ..Default::default()
        };
        let err = plan(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }
}
