//! Configuration management for exec-runner.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file (JSON)
//! 3. Default values

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::execution::{EngineSettings, DEFAULT_READ_BUFFER_SIZE};

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Default masking regex applied to every command.
    pub mask_pattern: Option<String>,
    /// Timeout in seconds for commands that carry none (unbounded if unset).
    pub default_timeout_secs: Option<u64>,
    /// Grace between SIGTERM and SIGKILL on timeout, in milliseconds.
    pub kill_grace_ms: u64,
    /// Readiness-poll slice in milliseconds.
    pub poll_interval_ms: u64,
    /// Bytes requested per pipe read.
    pub read_buffer_size: usize,
    /// Log level (error, warn, info, debug, trace) or a full filter directive.
    pub log_level: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mask_pattern: None,
            default_timeout_secs: None,
            kill_grace_ms: 500,
            poll_interval_ms: 100,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(pattern) = var("EXEC_RUNNER_MASK") {
            self.mask_pattern = (!pattern.is_empty()).then_some(pattern);
        }

        if let Some(secs) = var("EXEC_RUNNER_TIMEOUT") {
            self.default_timeout_secs = if secs.is_empty() {
                None
            } else {
                Some(parse_number("EXEC_RUNNER_TIMEOUT", &secs)?)
            };
        }

        if let Some(ms) = var("EXEC_RUNNER_KILL_GRACE_MS") {
            self.kill_grace_ms = parse_number("EXEC_RUNNER_KILL_GRACE_MS", &ms)?;
        }

        if let Some(ms) = var("EXEC_RUNNER_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_number("EXEC_RUNNER_POLL_INTERVAL_MS", &ms)?;
        }

        if let Some(level) = var("EXEC_RUNNER_LOG_LEVEL") {
            self.log_level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.log_level = level;
        }

        Ok(())
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: env vars > config file > defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => RunnerConfig::from_file(path)?,
            None => RunnerConfig::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Compile the default masking pattern.
    pub fn compile_mask(&self) -> Result<Option<Regex>, ConfigError> {
        self.mask_pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidMask {
                    pattern: pattern.to_string(),
                    source: e,
                })
            })
            .transpose()
    }

    /// Timeout applied to commands without their own.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }

    /// Execution loop tunables.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            kill_grace: Duration::from_millis(self.kill_grace_ms),
            read_buffer_size: self.read_buffer_size.max(1),
        }
    }

    /// Get the log level filter string.
    ///
    /// A bare level is scoped to this crate; anything else is passed through
    /// as a filter directive.
    pub fn log_filter(&self) -> String {
        const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];
        let level = self.log_level.trim();
        if LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            format!("exec_runner={}", level.to_ascii_lowercase())
        } else {
            level.to_string()
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        })
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Masking pattern is not a valid regex.
    InvalidMask {
        pattern: String,
        source: regex::Error,
    },
    /// Environment override is not a number.
    InvalidNumber { key: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidMask { pattern, source } => {
                write!(f, "invalid mask pattern {:?}: {}", pattern, source)
            }
            Self::InvalidNumber { key, value } => {
                write!(f, "invalid number for {}: {:?}", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::InvalidMask { source, .. } => Some(source),
            Self::InvalidNumber { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert!(config.mask_pattern.is_none());
        assert!(config.default_timeout().is_none());
        assert_eq!(config.kill_grace_ms, 500);
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.engine_settings(), EngineSettings::default());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "mask_pattern": "password=(\\S+)",
            "default_timeout_secs": 30,
            "kill_grace_ms": 200
        }"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = RunnerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.mask_pattern.as_deref(), Some("password=(\\S+)"));
        assert_eq!(config.default_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.kill_grace_ms, 200);
        assert_eq!(config.poll_interval_ms, 100); // Default
    }

    #[test]
    fn test_config_bad_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = RunnerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = RunnerConfig::from_file(Path::new("/nonexistent/runner.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
        assert!(err.to_string().starts_with("failed to read config file"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RunnerConfig::default();
        config
            .apply_vars(vars(&[
                ("EXEC_RUNNER_MASK", "token=(\\w+)"),
                ("EXEC_RUNNER_TIMEOUT", "15"),
                ("EXEC_RUNNER_KILL_GRACE_MS", "50"),
                ("EXEC_RUNNER_POLL_INTERVAL_MS", "10"),
                ("RUST_LOG", "warn"),
            ]))
            .unwrap();

        assert_eq!(config.mask_pattern.as_deref(), Some("token=(\\w+)"));
        assert_eq!(config.default_timeout_secs, Some(15));
        assert_eq!(config.kill_grace_ms, 50);
        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_log_level_env_beats_rust_log() {
        let mut config = RunnerConfig::default();
        config
            .apply_vars(vars(&[
                ("EXEC_RUNNER_LOG_LEVEL", "debug"),
                ("RUST_LOG", "warn"),
            ]))
            .unwrap();
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_empty_env_clears_optional_values() {
        let mut config = RunnerConfig {
            mask_pattern: Some("x=(\\d)".into()),
            default_timeout_secs: Some(5),
            ..RunnerConfig::default()
        };
        config
            .apply_vars(vars(&[("EXEC_RUNNER_MASK", ""), ("EXEC_RUNNER_TIMEOUT", "")]))
            .unwrap();
        assert!(config.mask_pattern.is_none());
        assert!(config.default_timeout_secs.is_none());
    }

    #[test]
    fn test_invalid_number() {
        let mut config = RunnerConfig::default();
        let err = config
            .apply_vars(vars(&[("EXEC_RUNNER_KILL_GRACE_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                key: "EXEC_RUNNER_KILL_GRACE_MS",
                ..
            }
        ));
    }

    #[test]
    fn test_compile_mask() {
        let config = RunnerConfig {
            mask_pattern: Some("pass=(\\S+)".into()),
            ..RunnerConfig::default()
        };
        let re = config.compile_mask().unwrap().unwrap();
        assert!(re.is_match("pass=123"));

        assert!(RunnerConfig::default().compile_mask().unwrap().is_none());

        let broken = RunnerConfig {
            mask_pattern: Some("pass=(".into()),
            ..RunnerConfig::default()
        };
        let err = broken.compile_mask().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMask { .. }));
    }

    #[test]
    fn test_engine_settings_floor() {
        let config = RunnerConfig {
            poll_interval_ms: 0,
            read_buffer_size: 0,
            ..RunnerConfig::default()
        };
        let settings = config.engine_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(1));
        assert_eq!(settings.read_buffer_size, 1);
    }

    #[test]
    fn test_log_filter() {
        let mut config = RunnerConfig::default();
        assert_eq!(config.log_filter(), "exec_runner=info");
        config.log_level = "DEBUG".into();
        assert_eq!(config.log_filter(), "exec_runner=debug");
        config.log_level = "exec_runner=trace,warn".into();
        assert_eq!(config.log_filter(), "exec_runner=trace,warn");
    }

    #[test]
    fn test_config_serialization() {
        let config = RunnerConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"kill_grace_ms\""));
        let back: RunnerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
