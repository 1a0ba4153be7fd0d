//! docker CLI calls for operations the API makes awkward.
//!
//! Building needs a tarred context and copying needs a tarred source; the CLI
//! already does both.

use crate::container::{BuildSpec, CopyToContainer};
use crate::runtime::{BuildFailure, BuildFailureReason, RuntimeResult};
use anyhow::{Context, bail};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// Arguments for `docker build`.
pub(super) fn build_args(spec: &BuildSpec, tag: &str) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "-t".to_string(),
        tag.to_string(),
        "-f".to_string(),
        spec.dockerfile_path().display().to_string(),
    ];
    for (key, value) in &spec.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{key}={value}"));
    }
    if let Some(target) = &spec.target {
        args.push("--target".to_string());
        args.push(target.clone());
    }
    if let Some(platform) = &spec.platform {
        args.push("--platform".to_string());
        args.push(platform.clone());
    }
    args.push(spec.context.display().to_string());
    args
}

pub(super) async fn build(
    binary: &Path,
    docker_host: Option<&str>,
    spec: &BuildSpec,
    tag: &str,
) -> Result<(), BuildFailure> {
    info!("Building image {} from {}", tag, spec.context.display());

    let output = command(binary, docker_host)
        .args(build_args(spec, tag))
        .output()
        .await
        .map_err(|e| {
            BuildFailure::new(
                BuildFailureReason::Other,
                format!("failed to run {} build: {}", binary.display(), e),
            )
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(BuildFailure::new(classify_build_failure(&stderr), stderr));
    }

    info!("Successfully built image: {}", tag);
    Ok(())
}

pub(super) async fn copy(
    binary: &Path,
    docker_host: Option<&str>,
    id: &str,
    copy: &CopyToContainer,
) -> RuntimeResult<()> {
    let destination = format!("{id}:{}", copy.target);
    debug!("Copying {} to {}", copy.source.display(), destination);

    let output = command(binary, docker_host)
        .arg("cp")
        .arg(&copy.source)
        .arg(&destination)
        .output()
        .await
        .with_context(|| format!("failed to run {} cp", binary.display()))?;

    if !output.status.success() {
        bail!(
            "docker cp failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

fn command(binary: &Path, docker_host: Option<&str>) -> Command {
    let mut command = Command::new(binary);
    if let Some(host) = docker_host {
        command.env("DOCKER_HOST", host);
    }
    command
}

/// Best-effort reading of build output.
///
/// The CLI reports every failure as a non-zero exit with free text, so this
/// matches on the phrases BuildKit and the classic builder print. Output it
/// does not recognise is reported as [`BuildFailureReason::Other`].
pub(super) fn classify_build_failure(stderr: &str) -> BuildFailureReason {
    let text = stderr.to_lowercase();

    let syntax = [
        "dockerfile parse error",
        "unknown instruction",
        "failed to parse dockerfile",
    ];
    let missing_file = [
        "failed to read dockerfile",
        "cannot locate specified dockerfile",
        "dockerfile: no such file or directory",
        "failed to compute cache key",
    ];
    let pull = [
        "pull access denied",
        "manifest unknown",
        "repository does not exist",
        "failed to resolve source metadata",
    ];

    if syntax.iter().any(|needle| text.contains(needle)) {
        BuildFailureReason::Syntax
    } else if missing_file.iter().any(|needle| text.contains(needle)) {
        BuildFailureReason::FileNotFound
    } else if pull.iter().any(|needle| text.contains(needle)) {
        BuildFailureReason::PullFailed
    } else {
        BuildFailureReason::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args() {
        let spec = BuildSpec::new("/ctx")
            .dockerfile("docker/Dockerfile.test")
            .build_arg("VERSION", "1.2")
            .target("runtime");

        let args = build_args(&spec, "app:test");
        assert_eq!(
            args,
            vec![
                "build",
                "-t",
                "app:test",
                "-f",
                "/ctx/docker/Dockerfile.test",
                "--build-arg",
                "VERSION=1.2",
                "--target",
                "runtime",
                "/ctx",
            ]
        );
    }

    #[test]
    fn test_classify_build_failure() {
        assert_eq!(
            classify_build_failure("Dockerfile parse error on line 3: unknown instruction: FORM"),
            BuildFailureReason::Syntax
        );
        assert_eq!(
            classify_build_failure(
                "ERROR: failed to solve: failed to read dockerfile: open Dockerfile: no such file or directory"
            ),
            BuildFailureReason::FileNotFound
        );
        assert_eq!(
            classify_build_failure(
                "ERROR: pull access denied for nosuchimage, repository does not exist"
            ),
            BuildFailureReason::PullFailed
        );
        assert_eq!(
            classify_build_failure("process \"/bin/sh -c exit 1\" did not complete"),
            BuildFailureReason::Other
        );
    }
}
