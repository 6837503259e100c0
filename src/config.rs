//! Configuration management for Tollgate.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TollgateError};

/// Prefix for environment variable overrides, e.g. `TOLLGATE__LIMITER__CAPACITY`.
const ENV_PREFIX: &str = "TOLLGATE";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Demo load generator configuration
    #[serde(default)]
    pub demo: DemoConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Permits granted per window
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_ms: default_window_ms(),
        }
    }
}

impl LimiterConfig {
    /// The window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Reject values the limiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(TollgateError::InvalidConfig(
                "limiter.capacity must be greater than zero".to_string(),
            ));
        }
        if self.window_ms == 0 {
            return Err(TollgateError::InvalidConfig(
                "limiter.window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_capacity() -> u64 {
    10
}

fn default_window_ms() -> u64 {
    1000
}

/// Demo load generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Number of concurrent callers
    #[serde(default = "default_callers")]
    pub callers: usize,

    /// Submissions issued by each caller
    #[serde(default = "default_requests_per_caller")]
    pub requests_per_caller: usize,

    /// Per-submission acquisition timeout in milliseconds (0 waits forever)
    #[serde(default)]
    pub acquire_timeout_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            callers: default_callers(),
            requests_per_caller: default_requests_per_caller(),
            acquire_timeout_ms: 0,
        }
    }
}

impl DemoConfig {
    /// The acquisition timeout, or `None` to wait indefinitely.
    pub fn acquire_timeout(&self) -> Option<Duration> {
        match self.acquire_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

fn default_callers() -> usize {
    8
}

fn default_requests_per_caller() -> usize {
    5
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

impl TollgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration layered from an optional YAML file and
    /// `TOLLGATE__*` environment variables, the latter taking precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.limiter.capacity, 10);
        assert_eq!(config.limiter.window(), Duration::from_secs(1));
        assert_eq!(config.demo.callers, 8);
        assert_eq!(config.demo.requests_per_caller, 5);
        assert_eq!(config.demo.acquire_timeout(), None);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
limiter:
  capacity: 3
demo:
  acquire_timeout_ms: 250
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.capacity, 3);
        assert_eq!(config.limiter.window_ms, 1000);
        assert_eq!(
            config.demo.acquire_timeout(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_from_yaml_invalid() {
        let result = TollgateConfig::from_yaml("limiter: [not, a, map]");
        assert!(matches!(result, Err(TollgateError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let zero_capacity = LimiterConfig {
            capacity: 0,
            window_ms: 100,
        };
        assert!(matches!(
            zero_capacity.validate(),
            Err(TollgateError::InvalidConfig(_))
        ));

        let zero_window = LimiterConfig {
            capacity: 1,
            window_ms: 0,
        };
        assert!(matches!(
            zero_window.validate(),
            Err(TollgateError::InvalidConfig(_))
        ));

        assert!(LimiterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_file_missing() {
        let result = TollgateConfig::from_file("/nonexistent/tollgate.yaml");
        assert!(matches!(result, Err(TollgateError::Io(_))));
    }

    #[test]
    fn test_load_layers_file_and_environment() {
        let path = std::env::temp_dir().join(format!("tollgate-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "limiter:\n  capacity: 4\n  window_ms: 500\ndemo:\n  callers: 2\n",
        )
        .unwrap();

        let config = TollgateConfig::load(Some(&path)).unwrap();
        assert_eq!(config.limiter.capacity, 4);
        assert_eq!(config.limiter.window_ms, 500);
        assert_eq!(config.demo.callers, 2);

        std::env::set_var("TOLLGATE__LIMITER__WINDOW_MS", "750");
        let config = TollgateConfig::load(Some(&path));
        std::env::remove_var("TOLLGATE__LIMITER__WINDOW_MS");
        let config = config.unwrap();

        assert_eq!(config.limiter.capacity, 4);
        assert_eq!(config.limiter.window_ms, 750);

        std::fs::remove_file(&path).unwrap();
    }
}
