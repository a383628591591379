//! Outcome of a variational run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use varq_opt::OptimizerStatus;

use crate::error::{AlgorithmError, AlgorithmResult, ErrorKind};

/// One completed optimizer iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Zero-based iteration index.
    pub index: usize,
    pub parameters: Vec<f64>,
    /// `+inf` for an evaluation absorbed as non-improving; exported as
    /// `null`.
    #[serde(with = "unbounded")]
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradient_norm: Option<f64>,
    /// Evaluation jobs consumed by the run up to and including this
    /// iteration.
    pub evaluations: usize,
}

mod unbounded {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        value.is_finite().then_some(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// A failed evaluation, either fatal or absorbed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Iteration during which the failure happened.
    pub iteration: usize,
    pub kind: ErrorKind,
    /// Message of the original cause.
    pub message: String,
}

/// Typed failure kept by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    pub iteration: usize,
    pub error: AlgorithmError,
}

impl RunFailure {
    pub fn report(&self) -> FailureReport {
        FailureReport {
            iteration: self.iteration,
            kind: self.error.kind(),
            message: self.error.to_string(),
        }
    }
}

/// Name and settings of the optimizer that produced a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSummary {
    pub name: String,
    pub settings: serde_json::Value,
}

/// Final record of a run. Built once by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationalResult {
    /// Problem name from the descriptor.
    pub problem: String,
    /// Best parameters found.
    pub parameters: Vec<f64>,
    /// Objective value at `parameters`, if any evaluation completed.
    pub value: Option<f64>,
    pub status: OptimizerStatus,
    /// Evaluation jobs submitted during the run.
    pub evaluations: usize,
    /// Objective value calls seen by the optimizer.
    pub nfev: usize,
    /// Gradient calls seen by the optimizer.
    pub njev: usize,
    /// Completed iterations.
    pub nit: usize,
    pub optimizer: OptimizerSummary,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    /// Evaluation failures absorbed under
    /// [`FailurePolicy::NonImproving`](crate::FailurePolicy::NonImproving).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_evaluations: Vec<FailureReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<IterationRecord>>,
}

impl VariationalResult {
    /// Whether the run ended without failure.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> AlgorithmResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> AlgorithmResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn from_json(json: &str) -> AlgorithmResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
