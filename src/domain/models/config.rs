use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::identity::{ArbiterRole, Capability};

/// Upper bound on reflection rounds, from configuration or DNA traits
pub const MAX_REFLECTION_ITERATIONS: u32 = 10;

/// Main configuration structure for an arbiter process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Identity and execution-core settings
    #[serde(default)]
    pub arbiter: ArbiterConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub task: TaskConfig,

    /// Fusion and reflection tuning
    #[serde(default)]
    pub router: RouterConfig,

    /// Generation backends
    #[serde(default)]
    pub generators: GeneratorsConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Arbiter identity and execution-core limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ArbiterConfig {
    #[serde(default = "default_arbiter_name")]
    pub name: String,

    #[serde(default = "default_role")]
    pub role: ArbiterRole,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<Capability>,

    /// Tunable trait values folded into the arbiter's DNA
    #[serde(default)]
    pub traits: BTreeMap<String, f64>,

    /// Bounded task queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_context_history_limit")]
    pub context_history_limit: usize,

    #[serde(default = "default_error_log_limit")]
    pub error_log_limit: usize,

    #[serde(default = "default_recent_task_limit")]
    pub recent_task_limit: usize,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// How long shutdown waits for the in-flight task
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_arbiter_name() -> String {
    "cognitive-router".to_string()
}

const fn default_role() -> ArbiterRole {
    ArbiterRole::CognitiveRouter
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_capabilities() -> Vec<Capability> {
    vec![
        Capability::CognitiveRouting,
        Capability::Perception,
        Capability::Reflection,
        Capability::Escalation,
        Capability::Cloning,
        Capability::Evolution,
    ]
}

const fn default_queue_capacity() -> usize {
    1000
}

const fn default_context_history_limit() -> usize {
    50
}

const fn default_error_log_limit() -> usize {
    100
}

const fn default_recent_task_limit() -> usize {
    100
}

const fn default_heartbeat_interval_secs() -> u64 {
    30
}

const fn default_shutdown_grace_ms() -> u64 {
    5000
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            name: default_arbiter_name(),
            role: default_role(),
            version: default_version(),
            capabilities: default_capabilities(),
            traits: BTreeMap::new(),
            queue_capacity: default_queue_capacity(),
            context_history_limit: default_context_history_limit(),
            error_log_limit: default_error_log_limit(),
            recent_task_limit: default_recent_task_limit(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the breaker stays open before probing
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_cooldown_secs() -> u64 {
    60
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Retry budget for tasks that do not set one
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    30000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TaskConfig {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    300
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Fusion, reflection and escalation tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RouterConfig {
    /// Reflection stops once fused confidence reaches this
    #[serde(default = "default_finalize_threshold")]
    pub finalize_threshold: f64,

    /// Escalation runs when confidence stays below this
    #[serde(default = "default_escalate_threshold")]
    pub escalate_threshold: f64,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_true")]
    pub reflection_enabled: bool,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Novelty above which the divergent generator runs first
    #[serde(default = "default_divergent_novelty_threshold")]
    pub divergent_novelty_threshold: f64,

    #[serde(default = "default_escalation_boost")]
    pub escalation_boost: f64,

    /// Final confidence below this publishes a low-confidence alert
    #[serde(default = "default_low_confidence_alert")]
    pub low_confidence_alert: f64,

    /// Characters of each response kept in provenance
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

const fn default_finalize_threshold() -> f64 {
    0.85
}

const fn default_escalate_threshold() -> f64 {
    0.70
}

const fn default_max_iterations() -> u32 {
    3
}

const fn default_true() -> bool {
    true
}

const fn default_history_capacity() -> usize {
    1000
}

const fn default_divergent_novelty_threshold() -> f64 {
    0.7
}

const fn default_escalation_boost() -> f64 {
    0.15
}

const fn default_low_confidence_alert() -> f64 {
    0.45
}

const fn default_snippet_chars() -> usize {
    160
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            finalize_threshold: default_finalize_threshold(),
            escalate_threshold: default_escalate_threshold(),
            max_iterations: default_max_iterations(),
            reflection_enabled: default_true(),
            history_capacity: default_history_capacity(),
            divergent_novelty_threshold: default_divergent_novelty_threshold(),
            escalation_boost: default_escalation_boost(),
            low_confidence_alert: default_low_confidence_alert(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

impl RouterConfig {
    /// Apply DNA trait overrides. Unknown trait names and non-finite values
    /// are ignored.
    ///
    /// Results stay inside the bounds configuration validation enforces:
    /// thresholds in [0, 1], at most [`MAX_REFLECTION_ITERATIONS`] rounds and
    /// `escalate_threshold <= finalize_threshold`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn with_traits(mut self, traits: &BTreeMap<String, f64>) -> Self {
        for (name, value) in traits {
            let value = *value;
            if !value.is_finite() {
                continue;
            }
            match name.as_str() {
                "finalize_threshold" => self.finalize_threshold = value.clamp(0.0, 1.0),
                "escalate_threshold" => self.escalate_threshold = value.clamp(0.0, 1.0),
                "max_iterations" => {
                    self.max_iterations = value
                        .round()
                        .clamp(0.0, f64::from(MAX_REFLECTION_ITERATIONS))
                        as u32;
                }
                "divergent_novelty_threshold" => {
                    self.divergent_novelty_threshold = value.clamp(0.0, 1.0);
                }
                "escalation_boost" => self.escalation_boost = value.clamp(0.0, 1.0),
                _ => {}
            }
        }
        self.escalate_threshold = self.escalate_threshold.min(self.finalize_threshold);
        self
    }
}

/// Wire protocol spoken by a generation backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorBackend {
    /// `POST {base_url}/v1/chat/completions`
    #[default]
    OpenaiChat,
    /// `POST {base_url}/api/generate`
    Ollama,
}

/// One generation backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GeneratorConfig {
    pub name: String,

    #[serde(default)]
    pub backend: GeneratorBackend,

    pub base_url: String,

    pub model: String,

    /// Environment variable holding the API key, if the backend needs one
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Confidence used when the completion does not report one
    #[serde(default = "default_base_confidence")]
    pub base_confidence: f64,

    /// Multiplier applied to every reported confidence
    #[serde(default = "default_calibration")]
    pub calibration: f64,
}

const fn default_generator_timeout_secs() -> u64 {
    45
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_base_confidence() -> f64 {
    0.7
}

const fn default_calibration() -> f64 {
    1.0
}

impl GeneratorConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: GeneratorBackend::default(),
            base_url: base_url.into(),
            model: model.into(),
            api_key_env: None,
            timeout_secs: default_generator_timeout_secs(),
            temperature: default_temperature(),
            base_confidence: default_base_confidence(),
            calibration: default_calibration(),
        }
    }

    pub fn with_backend(mut self, backend: GeneratorBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// The generators a routing arbiter talks to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GeneratorsConfig {
    #[serde(default = "default_divergent")]
    pub divergent: GeneratorConfig,

    #[serde(default = "default_convergent")]
    pub convergent: GeneratorConfig,

    /// Escalation target; escalation is skipped when absent
    #[serde(default)]
    pub arbiter: Option<GeneratorConfig>,
}

fn default_divergent() -> GeneratorConfig {
    GeneratorConfig::new("divergent", "http://localhost:11434", "llama3.1")
        .with_backend(GeneratorBackend::Ollama)
        .with_temperature(0.9)
}

fn default_convergent() -> GeneratorConfig {
    GeneratorConfig::new("convergent", "http://localhost:11434", "llama3.1")
        .with_backend(GeneratorBackend::Ollama)
        .with_temperature(0.2)
}

impl Default for GeneratorsConfig {
    fn default() -> Self {
        Self {
            divergent: default_divergent(),
            convergent: default_convergent(),
            arbiter: None,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".arbiter/arbiter.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for rolling log files; stdout only when absent
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            rotation: RotationPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.arbiter.queue_capacity, 1000);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.cooldown_secs, 60);
        assert_eq!(config.retry.max_backoff_ms, 30000);
        assert_eq!(config.task.default_timeout_secs, 300);
        assert!((config.router.finalize_threshold - 0.85).abs() < f64::EPSILON);
        assert!((config.router.escalate_threshold - 0.70).abs() < f64::EPSILON);
        assert!(config.generators.arbiter.is_none());
    }

    #[test]
    fn test_router_traits_override() {
        let mut traits = BTreeMap::new();
        traits.insert("finalize_threshold".to_string(), 0.9);
        traits.insert("max_iterations".to_string(), 1.0);
        traits.insert("unrelated".to_string(), 42.0);
        let router = RouterConfig::default().with_traits(&traits);
        assert!((router.finalize_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(router.max_iterations, 1);
        assert!((router.escalate_threshold - 0.70).abs() < f64::EPSILON);
    }

    #[test]
    fn test_router_traits_stay_within_validated_bounds() {
        let mut traits = BTreeMap::new();
        traits.insert("max_iterations".to_string(), 1e9);
        traits.insert("escalate_threshold".to_string(), 0.95);
        traits.insert("finalize_threshold".to_string(), 0.8);
        traits.insert("escalation_boost".to_string(), f64::NAN);
        let router = RouterConfig::default().with_traits(&traits);
        assert_eq!(router.max_iterations, MAX_REFLECTION_ITERATIONS);
        assert!((router.finalize_threshold - 0.8).abs() < f64::EPSILON);
        assert!((router.escalate_threshold - 0.8).abs() < f64::EPSILON);
        assert!((router.escalation_boost - 0.15).abs() < f64::EPSILON);

        let mut traits = BTreeMap::new();
        traits.insert("max_iterations".to_string(), -4.0);
        assert_eq!(RouterConfig::default().with_traits(&traits).max_iterations, 0);
    }

    #[test]
    fn test_yaml_partial_deserialize() {
        let yaml = "router:\n  max_iterations: 2\narbiter:\n  name: alpha\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.router.max_iterations, 2);
        assert_eq!(config.arbiter.name, "alpha");
        assert_eq!(config.arbiter.queue_capacity, 1000);
    }
}
