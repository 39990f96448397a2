use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Project-local configuration directory.
pub const CONFIG_DIR: &str = ".commitscope";

/// Prefix of environment overrides, e.g. `COMMITSCOPE_ADMISSION__MAX_PER_WINDOW`.
pub const ENV_PREFIX: &str = "COMMITSCOPE_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid worker_count: {0}. Must be between 1 and 256")]
    InvalidWorkerCount(usize),

    #[error("Invalid {0}: must be greater than zero")]
    ZeroValue(&'static str),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error(
        "Invalid backoff for provider '{provider}': backoff_base_ms ({base}) must not exceed backoff_cap_ms ({cap})"
    )]
    InvalidBackoff { provider: String, base: u64, cap: u64 },

    #[error("Fallback list references unknown provider '{0}'")]
    UnknownFallbackProvider(String),

    #[error("Fallback list for unknown analysis type '{0}'")]
    UnknownAnalysisType(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .commitscope/config.yaml (created by `init`)
    /// 3. .commitscope/local.yaml (optional local overrides)
    /// 4. Environment variables (COMMITSCOPE_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment(None)
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load with `path` in place of the project config files. Environment
    /// overrides still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config: Config = Self::figment(Some(path))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        let figment = match file {
            Some(path) => figment.merge(Yaml::file(path)),
            None => figment
                .merge(Yaml::file(Path::new(CONFIG_DIR).join("config.yaml")))
                .merge(Yaml::file(Path::new(CONFIG_DIR).join("local.yaml"))),
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.engine.worker_count == 0 || config.engine.worker_count > 256 {
            return Err(ConfigError::InvalidWorkerCount(config.engine.worker_count));
        }
        if config.engine.task_time_limit_secs == 0 {
            return Err(ConfigError::ZeroValue("engine.task_time_limit_secs"));
        }
        if config.engine.cancel_poll_interval_ms == 0 {
            return Err(ConfigError::ZeroValue("engine.cancel_poll_interval_ms"));
        }
        if config.engine.prompt_commit_limit == 0 {
            return Err(ConfigError::ZeroValue("engine.prompt_commit_limit"));
        }

        if config.admission.max_concurrent_per_user == 0 {
            return Err(ConfigError::ZeroValue("admission.max_concurrent_per_user"));
        }
        if config.admission.max_per_window == 0 {
            return Err(ConfigError::ZeroValue("admission.max_per_window"));
        }
        if config.admission.window_secs == 0 {
            return Err(ConfigError::ZeroValue("admission.window_secs"));
        }

        if config.data_fetch.timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("data_fetch.timeout_secs"));
        }

        for (name, backend) in &config.providers.backends {
            if backend.timeout_secs == 0 {
                return Err(ConfigError::ZeroValue("providers.backends.*.timeout_secs"));
            }
            if backend.requests_per_second == 0 || backend.burst_size == 0 {
                return Err(ConfigError::ZeroValue("providers.backends.*.requests_per_second/burst_size"));
            }
            if backend.backoff_base_ms > backend.backoff_cap_ms {
                return Err(ConfigError::InvalidBackoff {
                    provider: name.clone(),
                    base: backend.backoff_base_ms,
                    cap: backend.backoff_cap_ms,
                });
            }
        }

        let fallback_lists = std::iter::once(&config.providers.default_fallback)
            .chain(config.providers.fallback_by_type.values());
        for list in fallback_lists {
            if let Some(unknown) = list.iter().find(|p| !config.providers.backends.contains_key(*p)) {
                return Err(ConfigError::UnknownFallbackProvider(unknown.clone()));
            }
        }
        for analysis_type in config.providers.fallback_by_type.keys() {
            if crate::domain::models::AnalysisType::from_str(analysis_type).is_none() {
                return Err(ConfigError::UnknownAnalysisType(analysis_type.clone()));
            }
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::ZeroValue("database.max_connections"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.worker_count, 4);
        assert_eq!(config.admission.max_concurrent_per_user, 5);
        assert_eq!(config.admission.max_per_window, 20);
        assert_eq!(config.database.path, ".commitscope/commitscope.db");
        assert_eq!(config.export.retention_days, 7);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
engine:
  worker_count: 8
admission:
  max_per_window: 50
providers:
  default_fallback: [anthropic]
  fallback_by_type:
    security: [anthropic, openai]
logging:
  level: debug
  format: json
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.engine.worker_count, 8);
        assert_eq!(config.engine.task_time_limit_secs, 1800);
        assert_eq!(config.admission.max_per_window, 50);
        assert_eq!(config.admission.max_concurrent_per_user, 5);
        assert_eq!(config.providers.default_fallback, vec!["anthropic"]);
        assert_eq!(config.providers.fallback_by_type["security"], vec!["anthropic", "openai"]);
        assert!(config.providers.backends.contains_key("openai"));
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_workers() {
        let mut config = Config::default();
        config.engine.worker_count = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidWorkerCount(0))));
    }

    #[test]
    fn test_validate_zero_window() {
        let mut config = Config::default();
        config.admission.window_secs = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::ZeroValue(_))));
    }

    #[test]
    fn test_validate_unknown_fallback_provider() {
        let mut config = Config::default();
        config.providers.default_fallback.push("mistral".to_string());
        match ConfigLoader::validate(&config) {
            Err(ConfigError::UnknownFallbackProvider(name)) => assert_eq!(name, "mistral"),
            other => panic!("Expected UnknownFallbackProvider, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_unknown_analysis_type() {
        let mut config = Config::default();
        config.providers.fallback_by_type.insert("vibes".to_string(), vec!["openai".to_string()]);
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::UnknownAnalysisType(_))));
    }

    #[test]
    fn test_validate_inverted_backoff() {
        let mut config = Config::default();
        if let Some(openai) = config.providers.backends.get_mut("openai") {
            openai.backoff_base_ms = 10_000;
            openai.backoff_cap_ms = 1_000;
        }
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidBackoff { .. })));
    }

    #[test]
    fn test_validate_invalid_log_settings() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogLevel(_))));

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogFormat(_))));

        let mut config = Config::default();
        config.logging.rotation = "weekly".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidRotation(_))));
    }

    #[test]
    fn test_validate_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyDatabasePath)));
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "engine:\n  worker_count: 3\nadmission:\n  max_per_window: 7").unwrap();
        file.flush().unwrap();

        temp_env::with_vars(
            [
                ("COMMITSCOPE_ADMISSION__MAX_PER_WINDOW", Some("11")),
                ("COMMITSCOPE_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.engine.worker_count, 3, "file value should apply");
                assert_eq!(config.admission.max_per_window, 11, "env should win over file");
                assert_eq!(config.logging.level, "debug");
            },
        );
    }

    #[test]
    fn test_load_from_file_rejects_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "engine:\n  worker_count: 0").unwrap();
        file.flush().unwrap();
        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }
}
