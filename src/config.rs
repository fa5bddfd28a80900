use crate::{
    deploy::retry::RetryPolicy,
    error::{KompileError, KompileResult},
};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CONFIG_FILE: &str = "kompile.toml";

/// Settings read from `kompile.toml`. Every section and key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub controller: ControllerConfig,
    pub registry: RegistryConfig,
    pub scheduler: SchedulerConfig,
    pub build: BuildConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Cluster-internal host name services use to reach the controller.
    pub host: String,
    pub port: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: "kompile-controller".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    pub location: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            location: "localhost:5000".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    pub namespace: Option<String>,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            poll_interval_ms: 1000,
            max_attempts: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub go_version: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            go_version: "1.21".into(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> KompileResult<Self> {
        let content = fs::read_to_string(path).map_err(|error| KompileError::io(path, error))?;
        Self::from_toml(&content, path)
    }

    pub fn from_toml(content: &str, path: &Path) -> KompileResult<Self> {
        let config: Config = toml::from_str(content).map_err(|error| KompileError::Config {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Loads `explicit` when given, otherwise `./kompile.toml` when it
    /// exists, otherwise the defaults.
    pub fn discover(explicit: Option<&Path>) -> KompileResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
        if fallback.is_file() {
            return Self::load(&fallback);
        }
        Ok(Self::default())
    }

    fn validate(&self, path: &Path) -> KompileResult<()> {
        let invalid = |message: &str| KompileError::Config {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        if self.controller.host.trim().is_empty() {
            return Err(invalid("controller.host must not be empty"));
        }
        if self.controller.port == 0 {
            return Err(invalid("controller.port must be non-zero"));
        }
        if self.registry.location.trim().is_empty() {
            return Err(invalid("registry.location must not be empty"));
        }
        if self.scheduler.max_attempts == 0 {
            return Err(invalid("scheduler.max_attempts must be at least 1"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.scheduler.max_attempts,
            interval: Duration::from_millis(self.scheduler.poll_interval_ms),
        }
    }

    /// Base URL generated services post callbacks to.
    pub fn controller_url(&self) -> String {
        format!("http://{}:{}", self.controller.host, self.controller.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml("", Path::new("kompile.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.controller_url(), "http://kompile-controller:8080");
        assert_eq!(config.retry_policy().max_attempts, 120);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            "[controller]\nport = 9090\n[scheduler]\nnamespace = \"jobs\"\npoll_interval_ms = 250\n",
            Path::new("kompile.toml"),
        )
        .unwrap();
        assert_eq!(config.controller.host, "kompile-controller");
        assert_eq!(config.controller.port, 9090);
        assert_eq!(config.scheduler.namespace.as_deref(), Some("jobs"));
        assert_eq!(config.retry_policy().interval, Duration::from_millis(250));
        assert_eq!(config.build.go_version, "1.21");
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = Config::from_toml("[registry]\nurl = \"x\"\n", Path::new("k.toml")).unwrap_err();
        assert!(matches!(err, KompileError::Config { .. }));
    }

    #[test]
    fn rejects_zero_attempts() {
        let err = Config::from_toml("[scheduler]\nmax_attempts = 0\n", Path::new("k.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("invalid configuration"));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kompile.toml");
        fs::write(&path, "[registry]\nlocation = \"registry.local:5000\"\n").unwrap();
        let config = Config::discover(Some(&path)).unwrap();
        assert_eq!(config.registry.location, "registry.local:5000");
    }
}
