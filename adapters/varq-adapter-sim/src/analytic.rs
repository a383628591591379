//! Analytic backend implementation.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::{FxHashMap, FxHasher};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

use varq_hal::{
    Backend, BackendAvailability, EvaluationRequest, HalError, HalResult, Job, JobId, JobStatus,
    Payload,
};

/// Closed-form objective: parameters to one value per observable term.
pub type ObjectiveFn = Arc<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>;

type FailureFn = Arc<dyn Fn(&[f64]) -> bool + Send + Sync>;

/// Gaussian shot-noise model.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ShotNoise {
    shots: u32,
    seed: u64,
}

/// Job data for the analytic backend.
struct AnalyticJob {
    job: Job,
    ready_at: Instant,
    outcome: Result<Payload, String>,
}

/// Backend that evaluates registered closed-form functions.
///
/// Problems are looked up by [`ProblemDescriptor::name`](varq_hal::ProblemDescriptor).
/// Without noise, evaluation is exact and deterministic. With shot noise,
/// each value is perturbed by a Gaussian of variance `1 / shots`, seeded
/// from the base seed and the request identity so that repeated requests
/// give identical payloads.
///
/// A job is forgotten once its final outcome has been read: after
/// `result`, or after `status` reports it failed or cancelled.
pub struct AnalyticBackend {
    functions: FxHashMap<String, ObjectiveFn>,
    failure: Option<FailureFn>,
    noise: Option<ShotNoise>,
    latency: Duration,
    jobs: Arc<Mutex<FxHashMap<String, AnalyticJob>>>,
    submissions: AtomicUsize,
}

impl AnalyticBackend {
    /// Create a backend with no registered problems.
    pub fn new() -> Self {
        Self {
            functions: FxHashMap::default(),
            failure: None,
            noise: None,
            latency: Duration::ZERO,
            jobs: Arc::new(Mutex::new(FxHashMap::default())),
            submissions: AtomicUsize::new(0),
        }
    }

    /// Register a problem.
    pub fn with_function(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    /// Register every built-in benchmark problem.
    pub fn with_benchmarks(mut self) -> Self {
        for (name, f) in crate::benchmarks::all() {
            self.functions.insert(name.to_string(), f);
        }
        self
    }

    /// Fail every job whose parameters satisfy `predicate`.
    pub fn with_failure_predicate(
        mut self,
        predicate: impl Fn(&[f64]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.failure = Some(Arc::new(predicate));
        self
    }

    /// Add seeded shot noise.
    pub fn with_shot_noise(mut self, shots: u32, seed: u64) -> Self {
        self.noise = Some(ShotNoise {
            shots: shots.max(1),
            seed,
        });
        self
    }

    /// Keep jobs running for `latency` before they complete.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Names of the registered problems, sorted.
    pub fn problems(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of accepted submissions.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Jobs whose outcome has not been collected yet.
    pub fn retained_jobs(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn evaluate(&self, f: &ObjectiveFn, request: &EvaluationRequest) -> Result<Payload, String> {
        if let Some(fails) = &self.failure {
            if fails(&request.parameters) {
                return Err(format!(
                    "evaluation of {} failed at {:?}",
                    request.descriptor, request.parameters
                ));
            }
        }

        let exact = f(&request.parameters);
        let Some(noise) = self.noise else {
            return Ok(Payload::new(exact).with_metadata("backend", json!("analytic")));
        };

        let mut hasher = FxHasher::default();
        request.key().hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(noise.seed ^ hasher.finish());

        let variance = 1.0 / f64::from(noise.shots);
        let values = exact
            .iter()
            .map(|v| v + variance.sqrt() * standard_normal(&mut rng))
            .collect();
        Ok(Payload::new(values)
            .with_variances(vec![variance; exact.len()])
            .with_shots(noise.shots)
            .with_metadata("backend", json!("analytic"))
            .with_metadata("seed", json!(noise.seed)))
    }
}

impl Default for AnalyticBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Box-Muller sample from N(0, 1).
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.r#gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.r#gen();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

#[async_trait]
impl Backend for AnalyticBackend {
    fn name(&self) -> &str {
        "analytic"
    }

    async fn availability(&self) -> HalResult<BackendAvailability> {
        Ok(BackendAvailability::always_available())
    }

    #[instrument(skip(self, request), fields(problem = %request.descriptor))]
    async fn submit(&self, request: &EvaluationRequest) -> HalResult<JobId> {
        let f = self.functions.get(&request.descriptor.name).ok_or_else(|| {
            HalError::InvalidRequest(format!("unknown problem '{}'", request.descriptor.name))
        })?;

        let job_id = JobId::new(Uuid::new_v4().to_string());
        let outcome = self.evaluate(f, request);
        let status = match &outcome {
            Ok(_) => JobStatus::Completed,
            Err(msg) => JobStatus::Failed(msg.clone()),
        };
        let job = Job::new(job_id.clone())
            .with_backend("analytic")
            .with_status(status);

        {
            let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            jobs.insert(
                job_id.0.clone(),
                AnalyticJob {
                    job,
                    ready_at: Instant::now() + self.latency,
                    outcome,
                },
            );
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);

        debug!("Submitted job: {}", job_id);
        Ok(job_id)
    }

    async fn status(&self, job_id: &JobId) -> HalResult<JobStatus> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs
            .get(&job_id.0)
            .ok_or_else(|| HalError::JobNotFound(job_id.0.clone()))?;

        if entry.job.status != JobStatus::Cancelled && Instant::now() < entry.ready_at {
            return Ok(JobStatus::Running);
        }
        let status = entry.job.status.clone();
        // No result follows a failed or cancelled status.
        if matches!(status, JobStatus::Failed(_) | JobStatus::Cancelled) {
            jobs.remove(&job_id.0);
        }
        Ok(status)
    }

    async fn result(&self, job_id: &JobId) -> HalResult<Payload> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs
            .get(&job_id.0)
            .ok_or_else(|| HalError::JobNotFound(job_id.0.clone()))?;

        if entry.job.status != JobStatus::Cancelled && Instant::now() < entry.ready_at {
            return Err(HalError::Backend(format!("job {job_id} is still running")));
        }
        let entry = jobs
            .remove(&job_id.0)
            .ok_or_else(|| HalError::JobNotFound(job_id.0.clone()))?;
        if entry.job.status == JobStatus::Cancelled {
            return Err(HalError::JobCancelled);
        }
        entry.outcome.map_err(HalError::JobFailed)
    }

    async fn cancel(&self, job_id: &JobId) -> HalResult<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = jobs
            .get_mut(&job_id.0)
            .ok_or_else(|| HalError::JobNotFound(job_id.0.clone()))?;
        if Instant::now() < entry.ready_at {
            entry.job = entry.job.clone().with_status(JobStatus::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use varq_hal::ProblemDescriptor;

    use super::*;

    fn request(problem: &str, parameters: Vec<f64>) -> EvaluationRequest {
        EvaluationRequest::value(Arc::new(ProblemDescriptor::new(problem)), parameters)
    }

    #[tokio::test]
    async fn test_exact_evaluation() {
        let backend = AnalyticBackend::new().with_function("double", |x| vec![2.0 * x[0]]);
        let job_id = backend.submit(&request("double", vec![1.5])).await.unwrap();

        assert_eq!(backend.status(&job_id).await.unwrap(), JobStatus::Completed);
        let payload = backend.result(&job_id).await.unwrap();
        assert_eq!(payload.as_scalar(), Some(3.0));
        assert_eq!(payload.variances, None);
        assert_eq!(backend.submissions(), 1);

        // Collected jobs are forgotten.
        assert_eq!(backend.retained_jobs(), 0);
        assert!(matches!(
            backend.status(&job_id).await,
            Err(HalError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_problem_rejected() {
        let backend = AnalyticBackend::new();
        let err = backend.submit(&request("nope", vec![0.0])).await.unwrap_err();
        assert!(matches!(err, HalError::InvalidRequest(_)));
        assert_eq!(backend.submissions(), 0);
    }

    #[tokio::test]
    async fn test_failure_predicate() {
        let backend = AnalyticBackend::new()
            .with_function("id", |x| x.to_vec())
            .with_failure_predicate(|x| x[0] > 1.0);
        let polled = backend.submit(&request("id", vec![2.0])).await.unwrap();
        let fetched = backend.submit(&request("id", vec![3.0])).await.unwrap();

        assert!(matches!(
            backend.status(&polled).await.unwrap(),
            JobStatus::Failed(_)
        ));
        assert!(matches!(
            backend.result(&fetched).await,
            Err(HalError::JobFailed(_))
        ));
        assert_eq!(backend.retained_jobs(), 0);
    }

    #[tokio::test]
    async fn test_noise_is_seeded_per_request() {
        let backend = AnalyticBackend::new()
            .with_function("zero", |_| vec![0.0])
            .with_shot_noise(100, 5);

        let a = backend.submit(&request("zero", vec![0.1])).await.unwrap();
        let b = backend.submit(&request("zero", vec![0.1])).await.unwrap();
        let c = backend.submit(&request("zero", vec![0.2])).await.unwrap();

        let a = backend.result(&a).await.unwrap();
        let b = backend.result(&b).await.unwrap();
        let c = backend.result(&c).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a.values, c.values);
        assert_eq!(a.shots, Some(100));
        assert_eq!(a.variances, Some(vec![0.01]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_and_cancel() {
        let backend = AnalyticBackend::new()
            .with_function("id", |x| x.to_vec())
            .with_latency(Duration::from_millis(100));

        let slow = backend.submit(&request("id", vec![1.0])).await.unwrap();
        assert_eq!(backend.status(&slow).await.unwrap(), JobStatus::Running);
        assert!(backend.result(&slow).await.is_err());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(backend.status(&slow).await.unwrap(), JobStatus::Completed);

        let polled = backend.submit(&request("id", vec![2.0])).await.unwrap();
        let fetched = backend.submit(&request("id", vec![3.0])).await.unwrap();
        backend.cancel(&polled).await.unwrap();
        backend.cancel(&fetched).await.unwrap();
        assert_eq!(backend.status(&polled).await.unwrap(), JobStatus::Cancelled);
        assert!(matches!(
            backend.result(&fetched).await,
            Err(HalError::JobCancelled)
        ));
        // Only the completed, never-collected job is left.
        assert_eq!(backend.retained_jobs(), 1);
    }
}
