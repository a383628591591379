//! Optimizer outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why an optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerStatus {
    /// The convergence tolerance was met.
    Converged,
    /// The iteration budget ran out.
    MaxIterations,
    /// The evaluation (or wall-clock) budget ran out.
    MaxEvaluations,
    /// No valid point could be produced, or the objective failed.
    Failed,
}

impl OptimizerStatus {
    /// Whether the run ended without failure.
    pub fn is_success(&self) -> bool {
        !matches!(self, OptimizerStatus::Failed)
    }
}

impl fmt::Display for OptimizerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerStatus::Converged => write!(f, "converged"),
            OptimizerStatus::MaxIterations => write!(f, "max_iterations"),
            OptimizerStatus::MaxEvaluations => write!(f, "max_evaluations"),
            OptimizerStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a [`Optimizer::minimize`](crate::Optimizer::minimize) call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerResult {
    /// Best point found.
    pub x: Vec<f64>,
    /// Objective value at `x`; `None` if nothing was evaluated.
    pub fun: Option<f64>,
    /// Gradient at `x`, for optimizers that compute one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jac: Option<Vec<f64>>,
    /// Objective value evaluations.
    pub nfev: usize,
    /// Gradient evaluations.
    pub njev: usize,
    /// Completed iterations.
    pub nit: usize,
    /// Termination status.
    pub status: OptimizerStatus,
    /// Human-readable detail for the status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OptimizerResult {
    /// Result for a run that stopped before evaluating anything.
    pub fn unevaluated(x: Vec<f64>, status: OptimizerStatus) -> Self {
        Self {
            x,
            fun: None,
            jac: None,
            nfev: 0,
            njev: 0,
            nit: 0,
            status,
            message: None,
        }
    }

    /// Attach a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&OptimizerStatus::MaxEvaluations).unwrap(),
            "\"max_evaluations\""
        );
        assert_eq!(OptimizerStatus::Converged.to_string(), "converged");
        assert!(OptimizerStatus::MaxIterations.is_success());
        assert!(!OptimizerStatus::Failed.is_success());
    }

    #[test]
    fn test_unevaluated_result() {
        let r = OptimizerResult::unevaluated(vec![1.0], OptimizerStatus::Failed)
            .with_message("cancelled");
        assert_eq!(r.fun, None);
        assert_eq!(r.nfev, 0);
        assert_eq!(r.message.as_deref(), Some("cancelled"));
    }
}
