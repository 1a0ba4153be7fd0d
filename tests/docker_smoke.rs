//! End-to-end checks against a real Docker or Podman daemon.
//!
//! Run with `cargo test --test docker_smoke -- --ignored`. Tests skip
//! themselves when no daemon answers or SKIP_CONTAINER_TESTS=1.

#![cfg(feature = "docker")]

use serial_test::serial;
use std::time::Duration;
use test_tag::tag;
use testenv::container::ExecConfig;
use testenv::wait::WaitStrategy;
use testenv::{ComposeBuilder, ContainerBuilder, ErrorKind, Settings};

fn should_run_container_tests() -> bool {
    if let Ok(value) = std::env::var("SKIP_CONTAINER_TESTS")
        && (value == "1" || value.eq_ignore_ascii_case("true"))
    {
        return false;
    }

    ["docker", "podman"].iter().any(|binary| {
        std::process::Command::new(binary)
            .arg("info")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

#[tokio::test]
#[serial]
#[ignore = "requires a container daemon"]
#[tag(integration, container)]
async fn test_alpine_exec_and_cleanup() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests (no daemon or SKIP_CONTAINER_TESTS=1)");
        return;
    }

    let container = ContainerBuilder::new("alpine:3.20")
        .with_command(["sh", "-c", "echo booted; sleep 300"])
        .with_env("GREETING", "hello")
        .with_wait_strategy(WaitStrategy::log_text("booted").unwrap())
        .with_startup_timeout(Duration::from_secs(60))
        .with_settings(Settings::default())
        .start()
        .await
        .expect("alpine should start");

    let output = container
        .exec(["sh", "-c", "echo $GREETING"])
        .await
        .expect("exec should run");
    assert!(output.success());
    assert_eq!(output.stdout.trim(), "hello");

    let failed = container
        .exec_with(&ExecConfig::command(["sh", "-c", "exit 3"]))
        .await
        .expect("exec should run");
    assert_eq!(failed.exit_code, Some(3));

    container.cleanup().await.expect("cleanup should succeed");
    let err = container.exec(["true"]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotStarted);
}

#[tokio::test]
#[serial]
#[ignore = "requires a container daemon"]
#[tag(integration, container)]
async fn test_compose_round_trip() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests (no daemon or SKIP_CONTAINER_TESTS=1)");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("compose.yml"),
        "services:\n  web:\n    image: alpine:3.20\n    command: [\"sh\", \"-c\", \"echo up; sleep 300\"]\n",
    )
    .unwrap();

    let env = ComposeBuilder::new(dir.path(), "compose.yml")
        .with_project_name("testenv-smoke")
        .with_wait_strategy("web", WaitStrategy::log_text("up").unwrap())
        .with_settings(Settings::default())
        .start()
        .await
        .expect("compose environment should start");

    assert_eq!(env.network(), "testenv-smoke_default");
    assert_eq!(env.defined_services().await.unwrap(), vec!["web"]);

    env.cleanup().await.expect("compose down should succeed");
}
