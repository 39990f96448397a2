use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::models::LoggingConfig;

/// Resolved logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
    /// Directory for rolling log files; console only when unset
    pub log_dir: Option<PathBuf>,
    /// Console output goes to stderr so command output on stdout stays clean
    pub enable_console: bool,
    pub rotation: RotationPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            log_dir: None,
            enable_console: true,
            rotation: RotationPolicy::default(),
        }
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(config: &LoggingConfig) -> Self {
        let format = match config.format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        let rotation = match config.rotation.to_lowercase().as_str() {
            "hourly" => RotationPolicy::Hourly,
            "never" => RotationPolicy::Never,
            _ => RotationPolicy::Daily,
        };
        Self {
            level: config.level.clone(),
            format,
            log_dir: config.log_dir.as_ref().map(PathBuf::from),
            enable_console: true,
            rotation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_logging_config() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: "JSON".to_string(),
            log_dir: Some("/var/log/commitscope".to_string()),
            rotation: "hourly".to_string(),
        };
        let resolved = LogConfig::from(&config);
        assert_eq!(resolved.format, LogFormat::Json);
        assert_eq!(resolved.rotation, RotationPolicy::Hourly);
        assert_eq!(resolved.log_dir, Some(PathBuf::from("/var/log/commitscope")));
    }

    #[test]
    fn test_defaults_are_pretty_console() {
        let resolved = LogConfig::from(&LoggingConfig::default());
        assert_eq!(resolved.format, LogFormat::Pretty);
        assert!(resolved.log_dir.is_none());
        assert!(resolved.enable_console);
    }
}
