//! TOML configuration shared by the parameter writer, readers and tooling
//!
//! A process config embeds [`SharedConfig`] under `[shared]` and usually a
//! [`ParamShmConfig`] under `[segment]`; [`ConfigLoader::load`] reads it.

use crate::consts::{DEFAULT_SEGMENT_NAME, DEFAULT_WAIT_TIMEOUT_MS, PROTOCOL_VERSION, RETIRED_VERSION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading failure
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// No file at the given path
    #[error("Configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Unreadable file or invalid TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Value outside what the segment accepts
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log verbosity, lowercase in TOML
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// `[shared]` section of every weld process config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Instance name used in log lines, e.g. `weld-hmi-01`
    pub service_name: String,
}

impl SharedConfig {
    /// Reject an empty `service_name`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

fn default_segment_name() -> String {
    DEFAULT_SEGMENT_NAME.to_string()
}

fn default_expected_version() -> u32 {
    PROTOCOL_VERSION
}

fn default_wait_timeout_ms() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}

fn default_lock_pages() -> bool {
    true
}

/// Parameter segment settings shared by writer and readers.
///
/// # TOML Example
///
/// ```toml
/// [segment]
/// segment_name = "params"
/// expected_version = 3
/// wait_timeout_ms = 250
/// lock_pages = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamShmConfig {
    /// Segment name, mapped as `/dev/shm/weld_<segment_name>`.
    #[serde(default = "default_segment_name")]
    pub segment_name: String,

    /// Protocol version the process was built against.
    #[serde(default = "default_expected_version")]
    pub expected_version: u32,

    /// Upper bound for a single reader wait, in milliseconds.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Pre-fault the mapping at creation (writer only).
    #[serde(default = "default_lock_pages")]
    pub lock_pages: bool,
}

impl Default for ParamShmConfig {
    fn default() -> Self {
        Self {
            segment_name: default_segment_name(),
            expected_version: default_expected_version(),
            wait_timeout_ms: default_wait_timeout_ms(),
            lock_pages: default_lock_pages(),
        }
    }
}

impl ParamShmConfig {
    /// Reader wait timeout as a [`Duration`].
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Reject names that are not a single path component, the retired
    /// version marker and a zero wait bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_name.is_empty() || self.segment_name.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "invalid segment_name '{}'",
                self.segment_name
            )));
        }
        if self.expected_version == RETIRED_VERSION {
            return Err(ConfigError::ValidationError(
                "expected_version must not be 0".to_string(),
            ));
        }
        if self.wait_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "wait_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load any deserializable config from a TOML file.
///
/// A missing file is `FileNotFound`; any other IO failure or bad TOML is
/// `ParseError`. Semantic checks stay with the caller's `validate`.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_path_buf())
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Debug, Deserialize)]
    struct ToolConfig {
        shared: SharedConfig,
        #[serde(default)]
        segment: ParamShmConfig,
    }

    fn write_config(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{body}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn log_level_defaults_to_info_and_maps_to_tracing() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(tracing::Level::from(LogLevel::Warn), tracing::Level::WARN);
        assert_eq!(tracing::Level::from(LogLevel::Trace), tracing::Level::TRACE);
    }

    #[test]
    fn log_level_uses_lowercase_names() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Wrapper {
            level: LogLevel,
        }

        let parsed: Wrapper = toml::from_str("level = \"debug\"").unwrap();
        assert_eq!(parsed.level, LogLevel::Debug);
        assert!(toml::from_str::<Wrapper>("level = \"DEBUG\"").is_err());
    }

    #[test]
    fn shared_config_rejects_empty_service_name() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: String::new(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn segment_config_defaults() {
        let config = ParamShmConfig::default();
        assert_eq!(config.segment_name, DEFAULT_SEGMENT_NAME);
        assert_eq!(config.expected_version, PROTOCOL_VERSION);
        assert_eq!(
            config.wait_timeout(),
            Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn segment_config_validation() {
        let mut config = ParamShmConfig::default();
        config.segment_name = "a/b".to_string();
        assert!(config.validate().is_err());

        let mut config = ParamShmConfig::default();
        config.expected_version = RETIRED_VERSION;
        assert!(config.validate().is_err());

        let mut config = ParamShmConfig::default();
        config.wait_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loader_reports_missing_file() {
        let path = Path::new("/nonexistent/weld/params.toml");
        let err = ToolConfig::load(path).unwrap_err();
        assert!(matches!(&err, ConfigError::FileNotFound(missing) if missing == path));
        assert_eq!(
            err.to_string(),
            "Configuration file not found: /nonexistent/weld/params.toml"
        );
    }

    #[test]
    fn loader_reports_parse_error() {
        let file = write_config("invalid toml {{{{");
        let result = ToolConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn loader_reads_partial_segment_section() {
        let file = write_config(
            r#"[shared]
log_level = "debug"
service_name = "weld-hmi-01"

[segment]
segment_name = "line2"
wait_timeout_ms = 100
"#,
        );

        let config = ToolConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.shared.service_name, "weld-hmi-01");
        assert_eq!(config.segment.segment_name, "line2");
        assert_eq!(config.segment.wait_timeout_ms, 100);
        assert_eq!(config.segment.expected_version, PROTOCOL_VERSION);
        assert!(config.segment.lock_pages);
    }

    #[test]
    fn loader_applies_segment_defaults_when_section_missing() {
        let file = write_config("[shared]\nservice_name = \"weld-rt\"\n");
        let config = ToolConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Info);
        assert_eq!(config.segment, ParamShmConfig::default());
    }
}
