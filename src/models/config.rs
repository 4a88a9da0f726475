//! Configuration models for judgekit.
//!
//! Every tunable of a run lives here and is resolved from a TOML file, with
//! environment overrides for secrets and the thread cap.

use crate::eval::RagMetric;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::LazyLock;

/// Environment variable that overrides `runner.num_threads`.
pub const NUM_THREADS_ENV: &str = "NUM_THREADS";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Completion endpoint
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Concurrent runner settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Evaluator to build
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
}

/// OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// API key (can also be set via the env var named by `api_key_env`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL for the API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Model to retry with when a prompt overflows the context window
    #[serde(default = "default_fallback_models")]
    pub fallback_models: HashMap<String, String>,

    /// Custom headers; values can contain ${ENV_VAR}
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Cache identical requests for the lifetime of the process
    #[serde(default = "default_true")]
    pub cache: bool,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    3
}

fn default_fallback_models() -> HashMap<String, String> {
    [
        ("gpt-3.5-turbo", "gpt-3.5-turbo-16k"),
        ("gpt-3.5-turbo-0613", "gpt-3.5-turbo-16k-0613"),
        ("gpt-4", "gpt-4-32k"),
        ("gpt-4-0613", "gpt-4-32k-0613"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

fn default_true() -> bool {
    true
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            fallback_models: default_fallback_models(),
            headers: HashMap::new(),
            cache: true,
        }
    }
}

/// Runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Upper bound on worker threads
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// Name of the column results are written to
    #[serde(default = "default_output_column")]
    pub output_column: String,

    /// Draw a progress bar on stderr
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

fn default_num_threads() -> usize {
    8
}

fn default_output_column() -> String {
    "result".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            num_threads: default_num_threads(),
            output_column: default_output_column(),
            show_progress: true,
        }
    }
}

/// Which evaluator to build.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorKind {
    /// Pick one label per sample
    #[default]
    Classify,
    /// Score each sample on a numeric range
    Grade,
    /// Score question/answer/context rows
    Rag,
}

/// Position-debias strategy for classification.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DebiasStrategy {
    /// Draw a fresh label order for every call
    #[default]
    Shuffle,
    /// Ask twice with rotated labels; disagreement yields no prediction
    Consensus,
}

/// Few-shot example shown to the model before the sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub input: String,
    pub output: String,
}

/// Evaluator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default)]
    pub kind: EvaluatorKind,

    /// Model id passed to the completion endpoint
    #[serde(default = "default_model")]
    pub model: String,

    /// Instructions shown in the system prompt
    #[serde(default)]
    pub context: String,

    /// Label to description, for classification
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Inclusive lower bound, for grading
    #[serde(default)]
    pub number_from: Option<i64>,

    /// Inclusive upper bound, for grading
    #[serde(default)]
    pub number_to: Option<i64>,

    #[serde(default)]
    pub strategy: DebiasStrategy,

    /// Seed for label and reference shuffling
    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default)]
    pub references: Vec<Reference>,

    /// Reason step by step before answering
    #[serde(default)]
    pub chain_of_thought: bool,

    /// Metric to compute, for RAG evaluation
    #[serde(default)]
    pub metric: Option<RagMetric>,

    /// Dataset column passed as free-text context alongside each sample
    #[serde(default)]
    pub context_column: Option<String>,
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_seed() -> u64 {
    42
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            kind: EvaluatorKind::default(),
            model: default_model(),
            context: String::new(),
            labels: BTreeMap::new(),
            number_from: None,
            number_to: None,
            strategy: DebiasStrategy::default(),
            seed: default_seed(),
            references: Vec::new(),
            chain_of_thought: false,
            metric: None,
            context_column: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.num_threads == 0 {
            return Err(ConfigError::Invalid(
                "runner.num_threads must be a positive integer".to_string(),
            ));
        }
        if self.completion.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "completion.max_retries must be at least 1".to_string(),
            ));
        }

        let evaluator = &self.evaluator;
        match evaluator.kind {
            EvaluatorKind::Classify => {
                if evaluator.labels.is_empty() {
                    return Err(ConfigError::Invalid(
                        "evaluator.labels must not be empty for classification".to_string(),
                    ));
                }
            }
            EvaluatorKind::Grade => match (evaluator.number_from, evaluator.number_to) {
                (Some(from), Some(to)) if from < to => {}
                (Some(_), Some(_)) => {
                    return Err(ConfigError::Invalid(
                        "evaluator.number_from must be smaller than evaluator.number_to"
                            .to_string(),
                    ));
                }
                _ => {
                    return Err(ConfigError::Invalid(
                        "evaluator.number_from and evaluator.number_to are required for grading"
                            .to_string(),
                    ));
                }
            },
            EvaluatorKind::Rag => {
                if evaluator.metric.is_none() {
                    return Err(ConfigError::Invalid(
                        "evaluator.metric is required for RAG evaluation".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolve API key from config or environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.completion.api_key {
            return Ok(expand_env_vars(key));
        }

        std::env::var(&self.completion.api_key_env).map_err(|_| ConfigError::MissingApiKey {
            env_var: self.completion.api_key_env.clone(),
        })
    }

    /// Thread cap, with `NUM_THREADS` taking precedence over the file.
    pub fn resolve_num_threads(&self) -> Result<usize, ConfigError> {
        match std::env::var(NUM_THREADS_ENV) {
            Ok(raw) => parse_num_threads(&raw),
            Err(_) => Ok(self.runner.num_threads),
        }
    }
}

fn parse_num_threads(raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid(format!(
            "{NUM_THREADS_ENV} must be a positive integer, got {raw:?}"
        ))),
    }
}

static ENV_VAR_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Expand environment variables in all headers.
pub fn expand_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_vars(v)))
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var or completion.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("{0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
[evaluator]
labels = { POSITIVE = "positive review", NEGATIVE = "negative review" }
"#,
        )
        .unwrap();

        assert_eq!(config.runner.num_threads, 8);
        assert_eq!(config.runner.output_column, "result");
        assert_eq!(config.completion.timeout_secs, 15);
        assert_eq!(config.evaluator.kind, EvaluatorKind::Classify);
        assert_eq!(config.evaluator.strategy, DebiasStrategy::Shuffle);
        assert_eq!(config.evaluator.seed, 42);
        assert_eq!(
            config.completion.fallback_models.get("gpt-4").map(String::as_str),
            Some("gpt-4-32k")
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_grade_requires_ordered_range() {
        let config: Config = toml::from_str(
            r#"
[evaluator]
kind = "grade"
number_from = 5
number_to = 1
"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rag_requires_metric() {
        let config: Config = toml::from_str(
            r#"
[evaluator]
kind = "rag"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str(
            r#"
[evaluator]
kind = "rag"
metric = "faithfulness"
"#,
        )
        .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_threads_rejected() {
        let mut config = Config::default();
        config.evaluator.labels.insert("A".to_string(), "a".to_string());
        config.runner.num_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_num_threads() {
        assert_eq!(parse_num_threads("4").unwrap(), 4);
        assert_eq!(parse_num_threads(" 16 ").unwrap(), 16);
        assert!(parse_num_threads("0").is_err());
        assert!(parse_num_threads("many").is_err());
    }

    #[test]
    fn test_expand_env_vars_leaves_unknown_placeholders() {
        assert_eq!(
            expand_env_vars("Bearer ${JUDGEKIT_TEST_SURELY_UNSET}"),
            "Bearer ${JUDGEKIT_TEST_SURELY_UNSET}"
        );
        assert_eq!(expand_env_vars("plain"), "plain");
    }
}
