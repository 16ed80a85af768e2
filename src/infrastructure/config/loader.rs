use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

pub use crate::domain::models::config::MAX_REFLECTION_ITERATIONS;
use crate::domain::models::config::{Config, GeneratorConfig};

/// Project-local configuration directory
pub const CONFIG_DIR: &str = ".arbiter";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid queue_capacity: {0}. Must be at least 1")]
    InvalidQueueCapacity(usize),

    #[error("Invalid failure_threshold: {0}. Must be at least 1")]
    InvalidFailureThreshold(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid threshold {name}: {value}. Must be between 0 and 1")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error(
        "escalate_threshold ({escalate}) must not exceed finalize_threshold ({finalize})"
    )]
    ThresholdOrder { escalate: f64, finalize: f64 },

    #[error("Invalid max_iterations: {0}. Must be at most {MAX_REFLECTION_ITERATIONS}")]
    InvalidMaxIterations(u32),

    #[error("Generator '{0}' needs a base_url and a model")]
    IncompleteGenerator(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .arbiter/config.yaml (project config, created by init)
    /// 3. .arbiter/local.yaml (project local overrides, optional)
    /// 4. Environment variables (ARBITER_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// The merged provider chain used by [`ConfigLoader::load`].
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(format!("{CONFIG_DIR}/config.yaml")))
            .merge(Yaml::file(format!("{CONFIG_DIR}/local.yaml")))
            .merge(Env::prefixed("ARBITER_").split("__"))
    }

    /// Load configuration from a specific file, still honoring environment
    /// overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("ARBITER_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.arbiter.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity(0));
        }

        if config.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(0));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        let router = &config.router;
        for (name, value) in [
            ("finalize_threshold", router.finalize_threshold),
            ("escalate_threshold", router.escalate_threshold),
            ("divergent_novelty_threshold", router.divergent_novelty_threshold),
            ("escalation_boost", router.escalation_boost),
            ("low_confidence_alert", router.low_confidence_alert),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        if router.escalate_threshold > router.finalize_threshold {
            return Err(ConfigError::ThresholdOrder {
                escalate: router.escalate_threshold,
                finalize: router.finalize_threshold,
            });
        }
        if router.max_iterations > MAX_REFLECTION_ITERATIONS {
            return Err(ConfigError::InvalidMaxIterations(router.max_iterations));
        }

        let generators = &config.generators;
        for generator in [&generators.divergent, &generators.convergent]
            .into_iter()
            .chain(generators.arbiter.as_ref())
        {
            Self::validate_generator(generator)?;
        }

        // Validate database config
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        // Validate logging config
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }

    fn validate_generator(generator: &GeneratorConfig) -> Result<(), ConfigError> {
        if generator.base_url.trim().is_empty() || generator.model.trim().is_empty() {
            return Err(ConfigError::IncompleteGenerator(generator.name.clone()));
        }
        if !generator.calibration.is_finite() || generator.calibration < 0.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "generator '{}' calibration must be a non-negative number",
                generator.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.arbiter.name, "cognitive-router");
        assert_eq!(config.database.path, ".arbiter/arbiter.db");
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
arbiter:
  name: alpha
  queue_capacity: 10
router:
  max_iterations: 2
  finalize_threshold: 0.9
generators:
  arbiter:
    name: judge
    backend: openai_chat
    base_url: https://api.example.com
    model: big-model
    api_key_env: JUDGE_KEY
logging:
  level: debug
  format: pretty
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.arbiter.name, "alpha");
        assert_eq!(config.arbiter.queue_capacity, 10);
        assert_eq!(config.router.max_iterations, 2);
        let judge = config.generators.arbiter.as_ref().unwrap();
        assert_eq!(judge.api_key_env.as_deref(), Some("JUDGE_KEY"));
        assert_eq!(judge.timeout_secs, 45);

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_queue_capacity() {
        let mut config = Config::default();
        config.arbiter.queue_capacity = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidQueueCapacity(0)
        ));
    }

    #[test]
    fn test_validate_zero_failure_threshold() {
        let mut config = Config::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidFailureThreshold(0)
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 30000;
        config.retry.max_backoff_ms = 10000;

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidBackoff(30000, 10000)
        ));
    }

    #[test]
    fn test_validate_threshold_range_and_order() {
        let mut config = Config::default();
        config.router.finalize_threshold = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidThreshold {
                name: "finalize_threshold",
                ..
            }
        ));

        let mut config = Config::default();
        config.router.escalate_threshold = 0.9;
        config.router.finalize_threshold = 0.8;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::ThresholdOrder { .. }
        ));
    }

    #[test]
    fn test_validate_max_iterations() {
        let mut config = Config::default();
        config.router.max_iterations = 11;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMaxIterations(11)
        ));
    }

    #[test]
    fn test_validate_incomplete_generator() {
        let mut config = Config::default();
        config.generators.convergent.model = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::IncompleteGenerator(name) if name == "convergent"
        ));
    }

    #[test]
    fn test_validate_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::EmptyDatabasePath
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "arbiter:\n  queue_capacity: 5\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "arbiter:\n  queue_capacity: 15\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.arbiter.queue_capacity, 15, "Override should win");
        assert_eq!(
            config.logging.level, "debug",
            "Override should win for nested fields"
        );
        assert_eq!(
            config.logging.format,
            crate::domain::models::LogFormat::Json,
            "Base value should persist when not overridden"
        );
    }
}
