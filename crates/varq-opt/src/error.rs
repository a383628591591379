//! Error handling for optimizer construction.

use thiserror::Error;

/// Result type for optimizer configuration.
pub type OptResult<T> = Result<T, OptError>;

/// Errors raised while configuring an optimizer.
///
/// Running an optimizer never fails with an error; problems during a run
/// are reported through [`OptimizerStatus`](crate::OptimizerStatus).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptError {
    /// A setting is out of its valid range.
    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: String, reason: String },

    /// Bounds are malformed.
    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),

    /// Dimensions of two inputs disagree.
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

impl OptError {
    pub(crate) fn setting(name: &str, reason: impl Into<String>) -> Self {
        OptError::InvalidSetting {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OptError::setting("learning_rate", "must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid setting learning_rate: must be positive"
        );

        let err = OptError::DimensionMismatch {
            expected: 3,
            found: 2,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 3, found 2");
    }
}
