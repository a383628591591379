//! Job lifecycle types.
//!
//! Two state machines live here. [`JobStatus`] is what a backend reports
//! for its own (possibly remote) job. [`JobState`] is the local state of an
//! [`EvaluationJob`], the handle the variational core holds:
//!
//! ```text
//!   submit() ──→ Pending ──→ Running ──→ Done(payload)
//!                  │           │
//!                  │           ├──→ Failed(error)
//!                  │           │
//!                  └───────────┴──→ Cancelled
//! ```
//!
//! **Invariants:**
//! - Transitions are monotonic; a job never moves backward.
//! - Terminal states (`Done`, `Failed`, `Cancelled`) are permanent. Any
//!   later transition attempt is rejected, so a result that races a
//!   cancellation is dropped.
//! - Timing out on [`EvaluationJob::result`] never cancels the job.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::backend::Backend;
use crate::error::{HalError, HalResult};
use crate::payload::Payload;
use crate::request::EvaluationRequest;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new job ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a random job ID.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Status of a job as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Job is waiting in queue.
    Queued,
    /// Job is currently running.
    Running,
    /// Job completed successfully.
    Completed,
    /// Job failed with an error message.
    Failed(String),
    /// Job was cancelled.
    Cancelled,
}

impl JobStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed(_) | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "Queued"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed(msg) => write!(f, "Failed: {msg}"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Backend-side bookkeeping for a submitted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// The job identifier.
    pub id: JobId,
    /// Current status.
    pub status: JobStatus,
    /// Time the job was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Time the job started running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Time the job finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Backend the job was submitted to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            created_at: Some(Utc::now()),
            started_at: None,
            finished_at: None,
            backend: None,
        }
    }

    /// Set the backend name.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Update the status, stamping start and finish times.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        if matches!(self.status, JobStatus::Running) && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if self.status.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
        self
    }
}

/// Local state of an [`EvaluationJob`].
#[derive(Debug, Clone)]
pub enum JobState {
    /// Created, not yet handed to the backend.
    Pending,
    /// Handed to the backend.
    Running,
    /// Completed with a payload.
    Done(Payload),
    /// Failed; carries the captured error.
    Failed(HalError),
    /// Cancelled before completion.
    Cancelled,
}

impl JobState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Done(_) | JobState::Failed(_) | JobState::Cancelled
        )
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        match self {
            JobState::Pending => !matches!(next, JobState::Pending),
            JobState::Running => next.is_terminal(),
            _ => false,
        }
    }

    /// Short state name.
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Running => "Running",
            JobState::Done(_) => "Done",
            JobState::Failed(_) => "Failed",
            JobState::Cancelled => "Cancelled",
        }
    }
}

/// Shared control block between an [`EvaluationJob`] handle and the task
/// executing it.
pub(crate) struct JobControl {
    id: JobId,
    state: watch::Sender<JobState>,
    task: Mutex<Option<JoinHandle<()>>>,
    remote: Mutex<Option<JobId>>,
    backend: Arc<dyn Backend>,
}

impl JobControl {
    pub(crate) fn new(id: JobId, backend: Arc<dyn Backend>) -> Arc<Self> {
        let (state, _) = watch::channel(JobState::Pending);
        Arc::new(Self {
            id,
            state,
            task: Mutex::new(None),
            remote: Mutex::new(None),
            backend,
        })
    }

    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Apply a transition if it is legal. Returns whether it was applied.
    pub(crate) fn transition(&self, next: JobState) -> bool {
        let name = next.name();
        let applied = self.state.send_if_modified(|current| {
            if current.can_transition_to(&next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if !applied {
            debug!(job_id = %self.id, to = name, "rejected job state transition");
        }
        applied
    }

    pub(crate) fn attach_task(&self, handle: JoinHandle<()>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state.borrow().is_terminal() {
            handle.abort();
        } else {
            *task = Some(handle);
        }
    }

    pub(crate) fn set_remote(&self, remote: JobId) {
        *self.remote.lock().unwrap_or_else(PoisonError::into_inner) = Some(remote);
    }

    fn remote(&self) -> Option<JobId> {
        self.remote
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Handle to one in-flight evaluation.
///
/// Created by [`Dispatcher::submit`](crate::Dispatcher::submit). The handle
/// owns exactly one request. Dropping the handle does not cancel the job.
pub struct EvaluationJob {
    control: Arc<JobControl>,
    request: Arc<EvaluationRequest>,
    submitted_at: DateTime<Utc>,
}

impl EvaluationJob {
    pub(crate) fn new(control: Arc<JobControl>, request: Arc<EvaluationRequest>) -> Self {
        Self {
            control,
            request,
            submitted_at: Utc::now(),
        }
    }

    /// Local job identifier.
    pub fn id(&self) -> &JobId {
        &self.control.id
    }

    /// The request this job evaluates.
    pub fn request(&self) -> &EvaluationRequest {
        &self.request
    }

    /// Time the job was submitted.
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> JobState {
        self.control.state.borrow().clone()
    }

    /// Non-blocking completion check. True for any terminal state.
    pub fn done(&self) -> bool {
        self.control.state.borrow().is_terminal()
    }

    /// Wait for the job to reach a terminal state and return its payload.
    ///
    /// With `Some(limit)`, gives up after `limit` with [`HalError::Timeout`];
    /// the job keeps running and can still be awaited or cancelled.
    pub async fn result(&self, timeout: Option<Duration>) -> HalResult<Payload> {
        let mut rx = self.control.state.subscribe();
        let wait = async move {
            let state = rx
                .wait_for(JobState::is_terminal)
                .await
                .map_err(|_| HalError::Backend("job state channel closed".into()))?;
            Ok::<JobState, HalError>(state.clone())
        };

        let state = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| HalError::Timeout(self.id().to_string()))??,
            None => wait.await?,
        };

        match state {
            JobState::Done(payload) => Ok(payload),
            JobState::Failed(err) => Err(err),
            JobState::Cancelled => Err(HalError::JobCancelled),
            other => Err(HalError::Backend(format!(
                "job {} reported non-terminal state {}",
                self.id(),
                other.name()
            ))),
        }
    }

    /// Best-effort cancellation.
    ///
    /// Returns `true` if the job had not reached a terminal state and is now
    /// `Cancelled`. The executing task is aborted and, when the backend has
    /// already assigned a job ID, the backend is asked to cancel it too.
    pub fn cancel(&self) -> bool {
        if !self.control.transition(JobState::Cancelled) {
            return false;
        }
        if let Some(task) = self.control.take_task() {
            task.abort();
        }
        if let Some(remote) = self.control.remote() {
            let backend = Arc::clone(self.control.backend());
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = backend.cancel(&remote).await {
                        debug!(remote_id = %remote, error = %e, "backend cancel failed");
                    }
                });
            }
        }
        debug!(job_id = %self.id(), "job cancelled");
        true
    }
}

impl std::fmt::Debug for EvaluationJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationJob")
            .field("id", self.id())
            .field("state", &self.control.state.borrow().name())
            .field("kind", &self.request.kind)
            .finish()
    }
}
