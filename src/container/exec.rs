//! Commands run inside a started container.

use std::collections::BTreeMap;
use std::time::Duration;

/// A command plus the options it runs with.
///
/// ```
/// use std::time::Duration;
/// use testenv::container::ExecConfig;
///
/// let exec = ExecConfig::command(["psql", "-c", "select 1"])
///     .with_env("PGPASSWORD", "secret")
///     .with_user("postgres")
///     .with_timeout(Duration::from_secs(5));
/// assert_eq!(exec.env_pairs(), vec!["PGPASSWORD=secret"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecConfig {
    cmd: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<String>,
    user: Option<String>,
    privileged: bool,
    timeout: Option<Duration>,
}

impl ExecConfig {
    pub fn command<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Give up with an exec-timeout error after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cmd(&self) -> &[String] {
        &self.cmd
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// `KEY=value` pairs, sorted by key.
    pub fn env_pairs(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn privileged(&self) -> bool {
        self.privileged
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// What a finished command printed and how it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the runtime could not report it.
    pub exit_code: Option<i64>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr.
    pub fn output(&self) -> String {
        let mut combined = String::with_capacity(self.stdout.len() + self.stderr.len());
        combined.push_str(&self.stdout);
        combined.push_str(&self.stderr);
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_accumulate() {
        let exec = ExecConfig::command(vec!["redis-cli", "ping"])
            .with_env("B", "2")
            .with_env("A", "1")
            .with_env("B", "3")
            .with_working_dir("/data")
            .with_timeout(Duration::from_secs(2));

        assert_eq!(exec.cmd(), &["redis-cli", "ping"]);
        assert_eq!(exec.env_pairs(), vec!["A=1", "B=3"]);
        assert_eq!(exec.working_dir(), Some("/data"));
        assert_eq!(exec.user(), None);
        assert_eq!(exec.timeout(), Some(Duration::from_secs(2)));
        assert!(!exec.privileged());
    }

    #[test]
    fn test_missing_exit_code_is_not_success() {
        let output = ExecOutput {
            stdout: "PONG\n".into(),
            stderr: "warning\n".into(),
            exit_code: None,
        };

        assert!(!output.success());
        assert_eq!(output.output(), "PONG\nwarning\n");
    }
}
