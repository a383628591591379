//! Run configuration.
//!
//! Supports loading configuration from:
//! 1. Configuration files (YAML)
//! 2. Environment variables (with VARQ_ prefix)
//!
//! Environment variables override file values, which override defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use varq_hal::RetryPolicy;
use varq_opt::{Bounds, OptimizerConfig, Termination};

use crate::gradient::GradientStrategy;

/// Everything that shapes one variational run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum optimizer iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Maximum evaluation jobs across the run.
    #[serde(default)]
    pub max_evaluations: Option<usize>,

    /// Convergence tolerance handed to the optimizer.
    #[serde(default = "default_tolerance")]
    pub convergence_tolerance: f64,

    /// Gradient rule. Accepts a full tagged entry or a bare name
    /// (`analytic`, `finite-difference`, `none`).
    #[serde(
        default,
        alias = "gradient_strategy",
        deserialize_with = "deserialize_gradient"
    )]
    pub gradient: GradientStrategy,

    /// Retry policy for job submission.
    #[serde(default, alias = "retry_policy")]
    pub retry: RetryPolicy,

    /// Per-parameter `(min, max)` bounds.
    #[serde(default)]
    pub bounds: Option<Bounds>,

    /// Timeout for each job's result, in milliseconds.
    #[serde(default)]
    pub job_timeout_ms: Option<u64>,

    /// Wall-clock budget for the whole run, in milliseconds.
    #[serde(default)]
    pub wall_clock_budget_ms: Option<u64>,

    /// Dispatch identical requests of one fan-out only once.
    #[serde(default = "default_true")]
    pub deduplicate: bool,

    /// Include the iteration trace in the result.
    #[serde(default = "default_true")]
    pub record_trace: bool,

    /// What a failed evaluation job does to the run.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Optimizer selection.
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

/// Reaction of the driver to a failed evaluation job.
///
/// Retries happen below this, in the dispatcher's [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// End the run with status `Failed`.
    #[default]
    Abort,
    /// Report `+inf` to the optimizer and keep going. Gradient failures
    /// still abort.
    NonImproving,
}

impl std::str::FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(FailurePolicy::Abort),
            "non_improving" | "non-improving" => Ok(FailurePolicy::NonImproving),
            other => Err(ConfigError::ValidationError(format!(
                "unknown failure policy '{other}'"
            ))),
        }
    }
}

fn default_max_iterations() -> usize {
    100
}

fn default_tolerance() -> f64 {
    1e-6
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GradientSetting {
    Name(String),
    Full(GradientStrategy),
}

fn deserialize_gradient<'de, D>(deserializer: D) -> Result<GradientStrategy, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match GradientSetting::deserialize(deserializer)? {
        GradientSetting::Full(strategy) => Ok(strategy),
        GradientSetting::Name(name) => match name.as_str() {
            "analytic" | "parameter_shift" | "parameter-shift" => {
                Ok(GradientStrategy::parameter_shift())
            }
            "finite-difference" | "finite_difference" => Ok(GradientStrategy::FiniteDifference {
                epsilon: crate::gradient::default_epsilon(),
            }),
            "none" => Ok(GradientStrategy::None),
            other => Err(serde::de::Error::custom(format!(
                "unknown gradient strategy '{other}'"
            ))),
        },
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            max_iterations: default_max_iterations(),
            max_evaluations: None,
            convergence_tolerance: default_tolerance(),
            gradient: GradientStrategy::default(),
            retry: RetryPolicy::default(),
            bounds: None,
            job_timeout_ms: None,
            wall_clock_budget_ms: None,
            deduplicate: true,
            record_trace: true,
            failure_policy: FailurePolicy::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config = Self::from_yaml(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml_ng::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml_ng::to_string(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().merge_env()
    }

    /// Load configuration with the following precedence:
    /// 1. Load from file if provided
    /// 2. Apply environment variable overrides
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.merge_env();
        config.validate()?;
        Ok(config)
    }

    /// Merge environment variables into this configuration.
    ///
    /// Only variables that are set and parse override the current values.
    pub fn merge_env(mut self) -> Self {
        if let Some(v) = env_parse("VARQ_MAX_ITERATIONS") {
            self.max_iterations = v;
        }
        if let Some(v) = env_parse("VARQ_MAX_EVALUATIONS") {
            self.max_evaluations = Some(v);
        }
        if let Some(v) = env_parse("VARQ_TOLERANCE") {
            self.convergence_tolerance = v;
        }
        if let Some(v) = env_parse("VARQ_JOB_TIMEOUT_MS") {
            self.job_timeout_ms = Some(v);
        }
        if let Some(v) = env_parse("VARQ_WALL_CLOCK_BUDGET_MS") {
            self.wall_clock_budget_ms = Some(v);
        }
        if let Some(v) = env_parse("VARQ_MAX_RETRIES") {
            self.retry.max_retries = v;
        }
        if let Some(v) = env_parse("VARQ_FAILURE_POLICY") {
            self.failure_policy = v;
        }
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.convergence_tolerance.is_finite() && self.convergence_tolerance >= 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "convergence_tolerance must be non-negative, got {}",
                self.convergence_tolerance
            )));
        }

        if self.max_evaluations == Some(0) {
            return Err(ConfigError::ValidationError(
                "max_evaluations must be greater than 0".to_string(),
            ));
        }

        if self.job_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "job_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "retry multiplier must be at least 1, got {}",
                self.retry.multiplier
            )));
        }

        self.gradient
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        self.optimizer
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(())
    }

    /// Stopping rules for the optimizer.
    pub fn termination(&self) -> Termination {
        Termination {
            max_iterations: self.max_iterations,
            max_evaluations: self.max_evaluations,
            tolerance: self.convergence_tolerance,
        }
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_ms.map(Duration::from_millis)
    }

    pub fn wall_clock_budget(&self) -> Option<Duration> {
        self.wall_clock_budget_ms.map(Duration::from_millis)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
