//! Readiness checks polled after a container starts.
//!
//! A [`WaitStrategy`] is evaluated against a [`StartedContainer`] until it
//! succeeds or the startup timeout elapses, which yields a startup-timeout
//! lifecycle error. A container that exits while being polled fails straight
//! away with a start-failed error.

use crate::container::{ExposedPort, StartedContainer};
use crate::error::{Error, Result};
use crate::runtime::HealthStatus;
use regex::Regex;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// How to decide that a container is ready.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// `pattern` has matched the container output at least `times` times.
    LogMessage { pattern: Regex, times: usize },
    /// A TCP connection to the published port succeeds.
    ListeningPort { port: ExposedPort },
    /// The image's own healthcheck reports healthy.
    HealthCheck,
    /// An HTTP GET on the published port returns `status`.
    Http {
        port: ExposedPort,
        path: String,
        status: u16,
    },
    /// Sleep for a fixed time.
    Duration(Duration),
    /// Every strategy, in order.
    All(Vec<WaitStrategy>),
}

impl WaitStrategy {
    /// Wait for a log line matching the regular expression `pattern`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `pattern` is not a valid regex.
    pub fn log_message(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            Error::invalid_value("wait_strategy", "log pattern must be a valid regex", pattern)
                .with_source(e)
        })?;
        Ok(WaitStrategy::LogMessage { pattern, times: 1 })
    }

    /// Wait for a literal message to appear in the logs.
    pub fn log_text(text: &str) -> Result<Self> {
        Self::log_message(&regex::escape(text))
    }

    /// Require the log pattern to match `times` times.
    pub fn times(self, times: usize) -> Self {
        match self {
            WaitStrategy::LogMessage { pattern, .. } => WaitStrategy::LogMessage { pattern, times },
            other => other,
        }
    }

    pub fn listening_port(port: u32) -> Result<Self> {
        Ok(WaitStrategy::ListeningPort {
            port: ExposedPort::tcp(port)?,
        })
    }

    pub fn health_check() -> Self {
        WaitStrategy::HealthCheck
    }

    /// Wait for `GET http://host:<port><path>` to answer 200.
    pub fn http(path: impl Into<String>, port: u32) -> Result<Self> {
        Ok(WaitStrategy::Http {
            port: ExposedPort::tcp(port)?,
            path: path.into(),
            status: 200,
        })
    }

    /// Expect `status` instead of 200 from an HTTP strategy.
    pub fn with_status(self, status: u16) -> Self {
        match self {
            WaitStrategy::Http { port, path, .. } => WaitStrategy::Http { port, path, status },
            other => other,
        }
    }

    pub fn all(strategies: Vec<WaitStrategy>) -> Self {
        WaitStrategy::All(strategies)
    }

    fn describe(&self) -> String {
        match self {
            WaitStrategy::LogMessage { pattern, times } => {
                format!("log message /{}/ x{times}", pattern.as_str())
            }
            WaitStrategy::ListeningPort { port } => format!("listening port {port}"),
            WaitStrategy::HealthCheck => "healthcheck".to_string(),
            WaitStrategy::Http { port, path, status } => {
                format!("HTTP {status} on {port}{path}")
            }
            WaitStrategy::Duration(duration) => format!("fixed delay of {duration:?}"),
            WaitStrategy::All(strategies) => strategies
                .iter()
                .map(WaitStrategy::describe)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Poll `strategy` against `container` until it holds or `timeout` elapses.
///
/// # Errors
///
/// Returns a startup-timeout error when the strategy does not hold in time,
/// or the error of a check that cannot succeed (container exited, no
/// healthcheck defined).
pub async fn wait_until_ready(
    container: &StartedContainer,
    strategy: &WaitStrategy,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    info!(
        "Waiting up to {:?} for {} ({})",
        timeout,
        container.name(),
        strategy.describe()
    );

    match tokio::time::timeout(timeout, wait_for(container, strategy, poll_interval)).await {
        Ok(result) => result,
        Err(_) => Err(Error::startup_timeout(timeout)
            .with_container_name(container.name())
            .with_container_id(container.id())),
    }
}

async fn wait_for(
    container: &StartedContainer,
    strategy: &WaitStrategy,
    poll_interval: Duration,
) -> Result<()> {
    match strategy {
        WaitStrategy::Duration(duration) => {
            tokio::time::sleep(*duration).await;
            Ok(())
        }
        WaitStrategy::All(strategies) => {
            for strategy in strategies {
                Box::pin(wait_for(container, strategy, poll_interval)).await?;
            }
            Ok(())
        }
        _ => loop {
            if check(container, strategy).await? {
                debug!("{} is ready ({})", container.name(), strategy.describe());
                return Ok(());
            }
            if !container.is_running().await? {
                let logs = container.logs().await.unwrap_or_default();
                return Err(Error::start_failed(format!(
                    "{} exited before becoming ready; last output:\n{}",
                    container.name(),
                    tail(&logs, 20)
                ))
                .with_container_name(container.name())
                .with_container_id(container.id()));
            }
            tokio::time::sleep(poll_interval).await;
        },
    }
}

async fn check(container: &StartedContainer, strategy: &WaitStrategy) -> Result<bool> {
    match strategy {
        WaitStrategy::LogMessage { pattern, times } => {
            let logs = container.logs().await?;
            Ok(pattern.find_iter(&logs).count() >= *times)
        }
        WaitStrategy::ListeningPort { port } => {
            let host_port = container.mapped_port(*port).await?;
            Ok(TcpStream::connect((container.host(), host_port)).await.is_ok())
        }
        WaitStrategy::HealthCheck => match container.health().await? {
            HealthStatus::Healthy => Ok(true),
            HealthStatus::Starting | HealthStatus::Unhealthy => Ok(false),
            HealthStatus::NotConfigured => Err(Error::validation(
                "wait_strategy",
                "image must define a HEALTHCHECK",
                format!("{} has no healthcheck to wait for", container.name()),
            )
            .with_container_name(container.name())),
        },
        WaitStrategy::Http { port, path, status } => {
            let host_port = container.mapped_port(*port).await?;
            let url = http_url(container.host(), host_port, path)?;
            match reqwest::get(url).await {
                Ok(response) => Ok(response.status().as_u16() == *status),
                Err(e) => {
                    debug!("HTTP readiness check failed: {}", e);
                    Ok(false)
                }
            }
        }
        WaitStrategy::Duration(_) | WaitStrategy::All(_) => Ok(true),
    }
}

fn http_url(host: &str, port: u16, path: &str) -> Result<url::Url> {
    let base = format!("http://{host}:{port}/");
    url::Url::parse(&base)
        .and_then(|base| base.join(path.trim_start_matches('/')))
        .map_err(|e| {
            Error::invalid_value("wait_strategy", "HTTP path must form a valid URL", path)
                .with_source(e)
        })
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::{RecordingRuntime, RuntimeOp};
    use std::sync::Arc;

    fn started(runtime: &Arc<RecordingRuntime>) -> StartedContainer {
        StartedContainer::new("c1", "app", None, runtime.clone())
    }

    #[test]
    fn test_invalid_log_pattern() {
        let err = WaitStrategy::log_message("(unclosed").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_http_url_joins_path() {
        let url = http_url("localhost", 8080, "/health/ready").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/health/ready");
    }

    #[tokio::test]
    async fn test_log_message_counts_matches() {
        let runtime = Arc::new(RecordingRuntime::new());
        runtime.set_logs("ready\nready\n");
        let container = started(&runtime);

        let twice = WaitStrategy::log_text("ready").unwrap().times(2);
        wait_until_ready(&container, &twice, Duration::from_secs(1), Duration::from_millis(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_timeout_is_startup_timeout() {
        let runtime = Arc::new(RecordingRuntime::new());
        runtime.set_logs("booting\n");
        let container = started(&runtime);

        let strategy = WaitStrategy::log_text("ready").unwrap();
        let err = wait_until_ready(
            &container,
            &strategy,
            Duration::from_millis(50),
            Duration::from_millis(5),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StartupTimeout);
        assert_eq!(err.context()["timeout_ms"], 50);
        assert_eq!(err.context()["container_id"], "c1");
    }

    #[tokio::test]
    async fn test_health_check_without_healthcheck() {
        let runtime = Arc::new(RecordingRuntime::new());
        runtime.set_health(HealthStatus::NotConfigured);
        let container = started(&runtime);

        let err = wait_until_ready(
            &container,
            &WaitStrategy::health_check(),
            Duration::from_secs(1),
            Duration::from_millis(5),
        )
        .await
        .unwrap_err();
        assert!(err.is(ErrorKind::Validation));
        assert!(runtime.ops().contains(&RuntimeOp::Health));
    }
}
