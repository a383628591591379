//! Fan-out of evaluation requests with budgets and cancellation.
//!
//! Every evaluator and gradient call ends up here. A fan-out submits its
//! requests as concurrent jobs and suspends until all payloads are in,
//! returning them in request order. It is the only place the loop waits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::try_join_all;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};
use varq_hal::{Dispatcher, EvaluationJob, EvaluationRequest, Payload};

use crate::error::{AlgorithmError, AlgorithmResult, Budget};

/// Cloneable handle that cancels a run.
///
/// Cancelling aborts the jobs of the fan-out in flight and refuses all
/// later ones.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Shared dispatcher plus the bookkeeping every fan-out goes through.
pub struct JobPool {
    dispatcher: Dispatcher,
    max_evaluations: Option<usize>,
    job_timeout: Option<Duration>,
    deduplicate: bool,
    jobs: AtomicUsize,
    cancel: CancelHandle,
    deadline: Mutex<Option<Instant>>,
}

impl JobPool {
    /// Pool without budgets, de-duplicating requests.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            max_evaluations: None,
            job_timeout: None,
            deduplicate: true,
            jobs: AtomicUsize::new(0),
            cancel: CancelHandle::new(),
            deadline: Mutex::new(None),
        }
    }

    /// Cap the total number of submitted jobs.
    pub fn with_max_evaluations(mut self, max: Option<usize>) -> Self {
        self.max_evaluations = max;
        self
    }

    /// Timeout applied to each job's result.
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Enable or disable de-duplication within a fan-out.
    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.deduplicate = enabled;
        self
    }

    /// The dispatcher jobs are submitted through.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Jobs submitted so far. Never decreases.
    pub fn evaluations(&self) -> usize {
        self.jobs.load(Ordering::SeqCst)
    }

    /// Job budget, if any.
    pub fn max_evaluations(&self) -> Option<usize> {
        self.max_evaluations
    }

    /// Handle that cancels every current and future fan-out.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Refuse fan-outs once `budget` has elapsed from now.
    pub fn start_clock(&self, budget: Option<Duration>) {
        let deadline = budget.map(|b| Instant::now() + b);
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = deadline;
    }

    fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail fast when the run is cancelled or out of time.
    pub fn check_open(&self) -> AlgorithmResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AlgorithmError::Cancelled("run cancelled".into()));
        }
        if self.deadline().is_some_and(|d| Instant::now() >= d) {
            return Err(AlgorithmError::BudgetExceeded(Budget::WallClock));
        }
        Ok(())
    }

    /// Number of jobs `requests` would submit.
    pub fn cost(&self, requests: &[EvaluationRequest]) -> usize {
        if !self.deduplicate {
            return requests.len();
        }
        requests
            .iter()
            .map(EvaluationRequest::key)
            .collect::<FxHashSet<_>>()
            .len()
    }

    fn reserve(&self, count: usize) -> AlgorithmResult<()> {
        let max = self.max_evaluations;
        self.jobs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| match max {
                Some(max) if used + count > max => None,
                _ => Some(used + count),
            })
            .map(|_| ())
            .map_err(|_| AlgorithmError::BudgetExceeded(Budget::Evaluations))
    }

    /// Evaluate all `requests`, returning payloads in request order.
    ///
    /// Nothing is submitted unless the whole fan-out fits in the job
    /// budget. The first failure, cancellation or deadline expiry cancels
    /// the jobs still outstanding.
    pub async fn fan_out(&self, requests: Vec<EvaluationRequest>) -> AlgorithmResult<Vec<Payload>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        self.check_open()?;

        let (unique, slots) = self.collapse(requests);
        self.reserve(unique.len())?;

        let jobs: Vec<EvaluationJob> = unique
            .into_iter()
            .map(|request| self.dispatcher.submit(request))
            .collect();
        debug!(jobs = jobs.len(), requests = slots.len(), "fan-out submitted");

        let deadline = self.deadline();
        let outcome = tokio::select! {
            results = try_join_all(jobs.iter().map(|job| job.result(self.job_timeout))) => {
                results.map_err(AlgorithmError::from)
            }
            () = self.cancel.cancelled() => Err(AlgorithmError::Cancelled("run cancelled".into())),
            () = wait_until(deadline) => Err(AlgorithmError::BudgetExceeded(Budget::WallClock)),
        };

        match outcome {
            Ok(payloads) => Ok(slots.into_iter().map(|i| payloads[i].clone()).collect()),
            Err(e) => {
                let cancelled = jobs.iter().filter(|job| job.cancel()).count();
                if cancelled > 0 {
                    warn!(cancelled, error = %e, "fan-out aborted");
                }
                Err(e)
            }
        }
    }

    /// Drop duplicate requests. Returns the requests to submit and, for
    /// each original request, the index of the job that answers it.
    fn collapse(&self, requests: Vec<EvaluationRequest>) -> (Vec<EvaluationRequest>, Vec<usize>) {
        if !self.deduplicate {
            let slots = (0..requests.len()).collect();
            return (requests, slots);
        }

        let mut index = FxHashMap::default();
        let mut unique = Vec::with_capacity(requests.len());
        let mut slots = Vec::with_capacity(requests.len());
        for request in requests {
            let next = unique.len();
            let slot = *index.entry(request.key()).or_insert(next);
            if slot == next {
                unique.push(request);
            }
            slots.push(slot);
        }
        (unique, slots)
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
