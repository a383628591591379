//! Error taxonomy of the variational loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use varq_hal::HalError;
use varq_opt::OptError;

/// Errors raised while evaluating objectives or running the driver.
///
/// [`AlgorithmError::BudgetExceeded`] is raised by evaluators so the caller
/// can stop early; the driver reports it as a terminal status, never as a
/// failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlgorithmError {
    /// The backend rejected a request.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// A job ran and failed.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// A job or the whole run was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A job did not finish within its timeout.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// No valid point could be produced, e.g. a NaN objective.
    #[error("Convergence failure: {0}")]
    ConvergenceFailure(String),

    /// A parameter vector lies outside the configured bounds.
    #[error("Parameters out of bounds: {0}")]
    OutOfBounds(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation not valid in the current driver state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Result export failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A budget ran out. The driver turns this into a terminal status.
    #[error("{0} budget exhausted")]
    BudgetExceeded(Budget),
}

/// The budgets a run is limited by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Budget {
    Iterations,
    Evaluations,
    WallClock,
}

impl std::fmt::Display for Budget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Budget::Iterations => write!(f, "iteration"),
            Budget::Evaluations => write!(f, "evaluation"),
            Budget::WallClock => write!(f, "wall-clock"),
        }
    }
}

/// Serializable category of an [`AlgorithmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Submission,
    Execution,
    Cancelled,
    Timeout,
    ConvergenceFailure,
    OutOfBounds,
    Configuration,
    InvalidState,
    Serialization,
    BudgetExceeded,
}

impl AlgorithmError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AlgorithmError::Submission(_) => ErrorKind::Submission,
            AlgorithmError::Execution(_) => ErrorKind::Execution,
            AlgorithmError::Cancelled(_) => ErrorKind::Cancelled,
            AlgorithmError::Timeout(_) => ErrorKind::Timeout,
            AlgorithmError::ConvergenceFailure(_) => ErrorKind::ConvergenceFailure,
            AlgorithmError::OutOfBounds(_) => ErrorKind::OutOfBounds,
            AlgorithmError::Configuration(_) => ErrorKind::Configuration,
            AlgorithmError::InvalidState(_) => ErrorKind::InvalidState,
            AlgorithmError::Serialization(_) => ErrorKind::Serialization,
            AlgorithmError::BudgetExceeded(_) => ErrorKind::BudgetExceeded,
        }
    }
}

impl From<HalError> for AlgorithmError {
    fn from(err: HalError) -> Self {
        let message = err.to_string();
        match err {
            HalError::SubmissionFailed(_)
            | HalError::BackendUnavailable(_)
            | HalError::InvalidRequest(_) => AlgorithmError::Submission(message),
            HalError::JobCancelled => AlgorithmError::Cancelled(message),
            HalError::Timeout(_) => AlgorithmError::Timeout(message),
            HalError::Serialization(_) => AlgorithmError::Serialization(message),
            _ => AlgorithmError::Execution(message),
        }
    }
}

impl From<OptError> for AlgorithmError {
    fn from(err: OptError) -> Self {
        AlgorithmError::Configuration(err.to_string())
    }
}

impl From<crate::config::ConfigError> for AlgorithmError {
    fn from(err: crate::config::ConfigError) -> Self {
        AlgorithmError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for AlgorithmError {
    fn from(err: serde_json::Error) -> Self {
        AlgorithmError::Serialization(err.to_string())
    }
}

impl From<serde_yaml_ng::Error> for AlgorithmError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        AlgorithmError::Serialization(err.to_string())
    }
}

/// Result type for the variational loop.
pub type AlgorithmResult<T> = Result<T, AlgorithmError>;
