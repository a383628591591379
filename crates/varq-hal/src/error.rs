//! Error types for the HAL crate.

use thiserror::Error;

/// Errors that can occur while dispatching or executing evaluation jobs.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum HalError {
    /// Backend is not available.
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),

    /// The backend rejected the request.
    #[error("Job submission failed: {0}")]
    SubmissionFailed(String),

    /// The job ran and failed.
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// Job was cancelled.
    #[error("Job cancelled")]
    JobCancelled,

    /// Job not found.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The request cannot be executed by this backend.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timeout waiting for job.
    #[error("Timeout waiting for job {0}")]
    Timeout(String),

    /// Generic backend error.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl HalError {
    /// Whether a fresh submission of the same request may succeed.
    ///
    /// Only these errors are eligible for the dispatcher's retry policy.
    /// Cancellation, timeouts and malformed requests are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HalError::SubmissionFailed(_) | HalError::JobFailed(_) | HalError::BackendUnavailable(_)
        )
    }
}

impl From<serde_json::Error> for HalError {
    fn from(e: serde_json::Error) -> Self {
        HalError::Serialization(e.to_string())
    }
}

/// Result type for HAL operations.
pub type HalResult<T> = Result<T, HalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HalError::SubmissionFailed("queue full".into());
        assert_eq!(err.to_string(), "Job submission failed: queue full");

        let err = HalError::Timeout("job-1".into());
        assert_eq!(err.to_string(), "Timeout waiting for job job-1");
    }

    #[test]
    fn test_transient_classification() {
        assert!(HalError::SubmissionFailed("x".into()).is_transient());
        assert!(HalError::JobFailed("x".into()).is_transient());
        assert!(HalError::BackendUnavailable("x".into()).is_transient());
        assert!(!HalError::JobCancelled.is_transient());
        assert!(!HalError::Timeout("x".into()).is_transient());
        assert!(!HalError::InvalidRequest("x".into()).is_transient());
    }
}
