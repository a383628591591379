//! Execution backend trait.
//!
//! The [`Backend`] trait is the sole I/O boundary of the variational core.
//! A local analytic evaluator, a shot-based simulator and a remote device
//! service all implement the same lifecycle:
//!
//! ```text
//!   availability() ──→ submit() ──→ status() ──→ result()
//!      (async)          (async)      (async)      (async)
//! ```
//!
//! | Method | Kind | Required | Returns |
//! |--------|------|----------|---------|
//! | `name()` | sync | yes | `&str` |
//! | `availability()` | async | yes | `HalResult<BackendAvailability>` |
//! | `submit()` | async | yes | `HalResult<JobId>` |
//! | `status()` | async | yes | `HalResult<JobStatus>` |
//! | `result()` | async | yes | `HalResult<Payload>` |
//! | `cancel()` | async | yes | `HalResult<()>` |
//! | `wait()` | async | provided | `HalResult<Payload>` |

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{HalError, HalResult};
use crate::job::{JobId, JobStatus};
use crate::payload::Payload;
use crate::request::EvaluationRequest;

/// Trait for execution backends.
///
/// # Contract
///
/// - `submit()` MUST return a `JobId` whose initial status is `Queued` or
///   later. Rejections are reported as [`HalError::SubmissionFailed`].
/// - `result()` MUST only be called when status is `Completed`.
/// - Implementations must be `Send + Sync`; the dispatcher shares one
///   backend across concurrently executing jobs.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Get the name of this backend.
    fn name(&self) -> &str;

    /// Check backend availability.
    async fn availability(&self) -> HalResult<BackendAvailability>;

    /// Submit an evaluation request.
    async fn submit(&self, request: &EvaluationRequest) -> HalResult<JobId>;

    /// Get the status of a job.
    async fn status(&self, job_id: &JobId) -> HalResult<JobStatus>;

    /// Get the payload of a completed job.
    async fn result(&self, job_id: &JobId) -> HalResult<Payload>;

    /// Cancel a running job.
    async fn cancel(&self, job_id: &JobId) -> HalResult<()>;

    /// Poll a job until it reaches a terminal status and return its payload.
    ///
    /// There is no deadline here; callers bound the wait through
    /// [`EvaluationJob::result`](crate::EvaluationJob::result) or cancel the
    /// job.
    async fn wait(&self, job_id: &JobId, poll_interval: Duration) -> HalResult<Payload> {
        loop {
            match self.status(job_id).await? {
                JobStatus::Completed => return self.result(job_id).await,
                JobStatus::Failed(msg) => return Err(HalError::JobFailed(msg)),
                JobStatus::Cancelled => return Err(HalError::JobCancelled),
                JobStatus::Queued | JobStatus::Running => {
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }
}

/// Backend availability information.
#[derive(Debug, Clone)]
pub struct BackendAvailability {
    /// Whether the backend is currently accepting jobs.
    pub is_available: bool,
    /// Number of jobs currently in queue (if known).
    pub queue_depth: Option<u32>,
    /// Estimated wait time for a new job (if known).
    pub estimated_wait: Option<Duration>,
    /// Human-readable status message.
    pub status_message: Option<String>,
}

impl BackendAvailability {
    /// Availability for a backend with no queue.
    pub fn always_available() -> Self {
        Self {
            is_available: true,
            queue_depth: Some(0),
            estimated_wait: Some(Duration::ZERO),
            status_message: None,
        }
    }

    /// Availability for an offline backend.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            is_available: false,
            queue_depth: None,
            estimated_wait: None,
            status_message: Some(reason.into()),
        }
    }
}
