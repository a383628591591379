//! Job dispatch with retry at the submission boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::backend::Backend;
use crate::error::{HalError, HalResult};
use crate::job::{EvaluationJob, JobControl, JobId, JobState};
use crate::payload::Payload;
use crate::request::EvaluationRequest;

/// Bounded retry with exponential backoff.
///
/// Applied per job around the availability check, backend submit and
/// wait. Only errors for which
/// [`HalError::is_transient`](crate::HalError::is_transient) holds are
/// retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    #[serde(default)]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Factor applied to the delay after each retry.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_backoff_ms() -> u64 {
    100
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// No retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: default_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }

    /// Retry up to `max_retries` times starting at `backoff`.
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff_ms: backoff.as_millis() as u64,
            multiplier: default_multiplier(),
        }
    }

    /// Set the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(millis.min(u64::MAX as f64) as u64)
    }
}

/// Turns evaluation requests into running [`EvaluationJob`]s.
///
/// The dispatcher shares one backend across all jobs. `submit` returns
/// immediately; execution happens on a Tokio task.
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    retry: RetryPolicy,
    poll_interval: Duration,
    submitted: AtomicUsize,
}

impl Dispatcher {
    /// Create a dispatcher with no retries and a 10ms poll interval.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::none(),
            poll_interval: Duration::from_millis(10),
            submitted: AtomicUsize::new(0),
        }
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the interval used when polling the backend for job status.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Name of the underlying backend.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// The retry policy in effect.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Number of jobs submitted through this dispatcher.
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Submit a request. Must be called from within a Tokio runtime.
    #[instrument(skip_all, fields(backend = %self.backend.name(), problem = %request.descriptor))]
    pub fn submit(&self, request: EvaluationRequest) -> EvaluationJob {
        let id = JobId::random();
        let control = JobControl::new(id.clone(), Arc::clone(&self.backend));
        let request = Arc::new(request);
        self.submitted.fetch_add(1, Ordering::SeqCst);

        let handle = tokio::spawn(run_job(
            Arc::clone(&control),
            Arc::clone(&request),
            self.retry.clone(),
            self.poll_interval,
        ));
        control.attach_task(handle);

        debug!(job_id = %id, kind = ?request.kind, "submitted evaluation job");
        EvaluationJob::new(control, request)
    }
}

async fn run_job(
    control: Arc<JobControl>,
    request: Arc<EvaluationRequest>,
    retry: RetryPolicy,
    poll_interval: Duration,
) {
    if !control.transition(JobState::Running) {
        return;
    }

    let mut attempt = 0u32;
    let outcome = loop {
        if attempt > 0 {
            let backoff = retry.backoff(attempt);
            warn!(
                attempt = attempt + 1,
                "Retrying after transient failure (backoff {:?})", backoff
            );
            tokio::time::sleep(backoff).await;
        }

        match execute_once(&control, &request, poll_interval).await {
            Ok(payload) => break Ok(payload),
            Err(e) if e.is_transient() && attempt < retry.max_retries => {
                warn!(error = %e, "Transient evaluation failure");
                attempt += 1;
            }
            Err(e) => break Err(e),
        }
    };

    let next = match outcome {
        Ok(payload) => JobState::Done(payload),
        Err(e) => JobState::Failed(e),
    };
    control.transition(next);
}

async fn execute_once(
    control: &JobControl,
    request: &EvaluationRequest,
    poll_interval: Duration,
) -> HalResult<Payload> {
    let backend = control.backend();
    let availability = backend.availability().await?;
    if !availability.is_available {
        return Err(HalError::BackendUnavailable(
            availability
                .status_message
                .unwrap_or_else(|| backend.name().to_string()),
        ));
    }

    let remote = backend.submit(request).await?;
    control.set_remote(remote.clone());
    backend.wait(&remote, poll_interval).await
}
