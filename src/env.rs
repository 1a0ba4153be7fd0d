//! Names shared between the builders and the runtimes: configuration files,
//! environment variables and the labels put on managed containers.

use std::path::{Path, PathBuf};

/// Project-local configuration file name.
pub const CONFIG_FILE_NAME: &str = "testenv.toml";

/// Per-user configuration file name, looked up in `$HOME`.
pub const USER_CONFIG_FILE_NAME: &str = ".testenv.toml";

/// Environment variables read by [`crate::Settings::discover`].
pub mod vars {
    /// Explicit path of the configuration file.
    pub const CONFIG: &str = "TESTENV_CONFIG";

    pub const DOCKER_HOST: &str = "TESTENV_DOCKER_HOST";

    /// Docker's own variable, used when [`DOCKER_HOST`] is unset.
    pub const DOCKER_HOST_FALLBACK: &str = "DOCKER_HOST";

    pub const STARTUP_TIMEOUT_SECS: &str = "TESTENV_STARTUP_TIMEOUT_SECS";

    pub const STOP_TIMEOUT_SECS: &str = "TESTENV_STOP_TIMEOUT_SECS";

    pub const REUSE_ENABLE: &str = "TESTENV_REUSE_ENABLE";

    pub const DOCKER_BINARY: &str = "TESTENV_DOCKER_BINARY";
}

/// Labels put on everything this crate creates.
pub mod labels {
    /// Marks containers and networks created by this crate.
    pub const MANAGED: &str = "testenv.managed";

    /// Hash of the creation request, used to find reusable containers.
    pub const REUSE_HASH: &str = "testenv.reuse-hash";

    /// Name of the service a container was started for.
    pub const SERVICE: &str = "testenv.service";
}

/// Project-local configuration file under `dir`.
pub fn local_config_file_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
}

/// Per-user configuration file under `home`.
pub fn user_config_file_path(home: &Path) -> PathBuf {
    home.join(USER_CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        let dir = Path::new("/work/project");
        assert_eq!(
            local_config_file_path(dir),
            PathBuf::from("/work/project/testenv.toml")
        );

        let home = Path::new("/home/dev");
        assert_eq!(
            user_config_file_path(home),
            PathBuf::from("/home/dev/.testenv.toml")
        );
    }
}
