//! Standalone container lifecycle against the in-memory runtime.

use std::sync::Arc;
use std::time::Duration;
use testenv::container::{BuildSpec, ExecOutput};
use testenv::runtime::{BuildFailure, BuildFailureReason, RecordingRuntime, RuntimeOp};
use testenv::wait::WaitStrategy;
use testenv::{ContainerBuilder, ErrorKind, Settings};

fn settings() -> Settings {
    Settings {
        poll_interval_ms: 10,
        ..Settings::default()
    }
}

fn redis(runtime: &Arc<RecordingRuntime>) -> ContainerBuilder {
    ContainerBuilder::new("redis:7-alpine")
        .with_runtime(runtime.clone())
        .with_settings(settings())
}

#[tokio::test]
async fn test_invalid_port_fails_before_runtime() {
    for port in [0, 70000] {
        let runtime = Arc::new(RecordingRuntime::new());
        let err = redis(&runtime)
            .with_exposed_port(port)
            .start()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidPort);
        assert!(err.is(ErrorKind::Configuration));
        assert_eq!(err.context()["port"], port);
        assert!(runtime.ops().is_empty(), "runtime was contacted for port {port}");
    }
}

#[tokio::test]
async fn test_start_maps_every_exposed_port() {
    let runtime = Arc::new(RecordingRuntime::new());
    let result = redis(&runtime)
        .with_exposed_port(6379)
        .with_exposed_port(8001)
        .with_working_dir("/tmp")
        .with_working_dir("/data")
        .start()
        .await
        .unwrap();

    assert_eq!(result.host(), "localhost");
    assert_eq!(result.mapped_port(6379).unwrap(), 32768);
    assert_eq!(result.mapped_port(8001).unwrap(), 32769);

    let request = &runtime.requests()[0];
    assert_eq!(request.working_dir.as_deref(), Some("/data"));
    assert_eq!(request.exposed_ports.len(), 2);

    result.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_pull_only_when_missing() {
    let runtime = Arc::new(RecordingRuntime::new());
    runtime.with_image("redis:7-alpine");

    let result = redis(&runtime).start().await.unwrap();
    assert!(!runtime.ops().contains(&RuntimeOp::PullImage));
    result.cleanup().await.unwrap();

    let runtime = Arc::new(RecordingRuntime::new());
    let result = redis(&runtime).start().await.unwrap();
    assert!(runtime.ops().contains(&RuntimeOp::PullImage));
    result.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_pull_failure_is_image_error() {
    let runtime = Arc::new(RecordingRuntime::new());
    runtime.fail(RuntimeOp::PullImage, "manifest unknown");

    let err = ContainerBuilder::new("ghcr.io/acme/api:1.0")
        .with_runtime(runtime.clone())
        .with_settings(settings())
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ImagePullFailed);
    assert_eq!(err.context()["registry"], "ghcr.io");
    assert!(!runtime.ops().contains(&RuntimeOp::CreateContainer));
}

#[tokio::test]
async fn test_start_failure_removes_container() {
    let runtime = Arc::new(RecordingRuntime::new());
    runtime.fail(RuntimeOp::StartContainer, "no space left on device");

    let err = redis(&runtime).start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StartFailed);
    assert_eq!(err.context()["container_id"], "container-1");
    assert!(runtime.ops().contains(&RuntimeOp::RemoveContainer));
}

#[tokio::test]
async fn test_unmapped_port_is_start_failure_with_port_parent() {
    let runtime = Arc::new(RecordingRuntime::new());
    runtime.with_unmapped_port(6379);

    let err = redis(&runtime)
        .with_exposed_port(6379)
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StartFailed);
    let parent = err.parent().unwrap();
    assert_eq!(parent.kind(), ErrorKind::PortBinding);
    assert_eq!(parent.context()["port"], 6379);
    assert!(runtime.ops().contains(&RuntimeOp::RemoveContainer));
}

#[tokio::test]
async fn test_log_wait_strategy() {
    let runtime = Arc::new(RecordingRuntime::new());
    runtime.set_logs("booting\nReady to accept connections\n");

    let result = redis(&runtime)
        .with_wait_strategy(WaitStrategy::log_text("Ready to accept connections").unwrap())
        .start()
        .await
        .unwrap();
    result.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_unmet_wait_strategy_times_out() {
    let runtime = Arc::new(RecordingRuntime::new());
    runtime.set_logs("still booting\n");

    let err = redis(&runtime)
        .with_wait_strategy(WaitStrategy::log_text("Ready").unwrap())
        .with_startup_timeout(Duration::from_millis(100))
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StartupTimeout);
    assert_eq!(err.context()["timeout_ms"], 100);
    assert!(runtime.ops().contains(&RuntimeOp::RemoveContainer));
}

#[tokio::test]
async fn test_operations_after_cleanup_are_not_started() {
    let runtime = Arc::new(RecordingRuntime::new());
    runtime.push_exec_output(ExecOutput {
        stdout: "PONG\n".into(),
        stderr: String::new(),
        exit_code: Some(0),
    });

    let result = redis(&runtime).start().await.unwrap();
    let output = result.exec(["redis-cli", "ping"]).await.unwrap();
    assert_eq!(output.stdout.trim(), "PONG");

    result.cleanup().await.unwrap();
    result.cleanup().await.unwrap();

    let err = result.exec(["redis-cli", "ping"]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotStarted);
    assert_eq!(err.context()["operation"], "exec");

    let err = result.logs().await.err().expect("logs after cleanup should fail");
    assert_eq!(err.kind(), ErrorKind::NotStarted);
    assert_eq!(err.context()["operation"], "logs");

    let removals = runtime
        .ops()
        .into_iter()
        .filter(|op| *op == RuntimeOp::RemoveContainer)
        .count();
    assert_eq!(removals, 1);
}

#[tokio::test]
async fn test_missing_build_context_is_file_not_found() {
    let runtime = Arc::new(RecordingRuntime::new());
    let err = ContainerBuilder::from_build(BuildSpec::new("/definitely/not/here"))
        .with_runtime(runtime.clone())
        .with_settings(settings())
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FileNotFound);
    assert!(!runtime.ops().contains(&RuntimeOp::BuildImage));
}

#[tokio::test]
async fn test_build_failure_is_classified() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Dockerfile"), "FROM alpine:3\nRUN exit 1\n").unwrap();

    let runtime = Arc::new(RecordingRuntime::new());
    runtime.fail_build(BuildFailure::new(
        BuildFailureReason::Syntax,
        "dockerfile parse error line 2: unknown instruction",
    ));

    let err = ContainerBuilder::from_build(BuildSpec::new(dir.path()).tag("local/app:test"))
        .with_runtime(runtime.clone())
        .with_settings(settings())
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DockerfileSyntax);
    assert!(err.is(ErrorKind::Image));
    assert!(!runtime.ops().contains(&RuntimeOp::CreateContainer));
}
