//! End-to-end runs against the analytic backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use varq_adapter_sim::AnalyticBackend;
use varq_core::{
    DriverState, ErrorKind, FailurePolicy, GradientStrategy, RunConfig, VariationalDriver,
    VariationalResult,
};
use varq_hal::{
    Backend, BackendAvailability, EvaluationRequest, HalError, HalResult, JobId, JobStatus,
    Payload, ProblemDescriptor, RetryPolicy,
};
use varq_opt::{Bounds, NelderMead, OptimizerConfig, OptimizerStatus, Spsa};

fn parabola() -> AnalyticBackend {
    AnalyticBackend::new().with_function("parabola", |x| vec![(x[0] - 3.0).powi(2)])
}

fn descent_config(max_iterations: usize) -> RunConfig {
    RunConfig {
        max_iterations,
        convergence_tolerance: 1e-6,
        gradient: GradientStrategy::finite_difference(1e-3),
        optimizer: OptimizerConfig::GradientDescent {
            learning_rate: 0.1,
            finite_diff_epsilon: 1e-4,
        },
        ..RunConfig::default()
    }
}

async fn run(
    backend: Arc<dyn Backend>,
    problem: &str,
    x0: Vec<f64>,
    config: RunConfig,
) -> (VariationalDriver, VariationalResult) {
    let mut driver =
        VariationalDriver::new(backend, ProblemDescriptor::new(problem), x0, config).unwrap();
    let result = driver.run().await.unwrap();
    (driver, result)
}

// ---------------------------------------------------------------------------
// Convergence and stopping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_parabola_converges() {
    let (driver, result) = run(Arc::new(parabola()), "parabola", vec![0.0], descent_config(200)).await;

    assert_eq!(result.status, OptimizerStatus::Converged);
    assert_eq!(driver.state(), DriverState::Converged);
    assert!((result.parameters[0] - 3.0).abs() < 1e-3);
    assert!(result.value.unwrap() < 1e-6);
    assert!(result.failure.is_none());

    // One value and two shifted evaluations per iteration.
    let trace = result.trace.as_ref().unwrap();
    assert_eq!(trace.len(), result.nit);
    assert_eq!(result.evaluations, 3 * result.nit);
    assert_eq!(trace[0].evaluations, 3);
}

#[tokio::test]
async fn test_iteration_limit() {
    let (driver, result) = run(Arc::new(parabola()), "parabola", vec![0.0], descent_config(2)).await;

    assert_eq!(result.status, OptimizerStatus::MaxIterations);
    assert_eq!(driver.state(), DriverState::MaxIterations);
    assert_eq!(result.nit, 2);
    assert_eq!(driver.trace().len(), 2);
    assert_eq!(result.trace.unwrap().len(), 2);
    assert!(result.failure.is_none());
}

#[tokio::test]
async fn test_evaluation_budget_never_exceeded() {
    let backend = Arc::new(parabola());
    let config = RunConfig {
        max_evaluations: Some(20),
        ..descent_config(200)
    };
    let (driver, result) = run(backend.clone(), "parabola", vec![0.0], config).await;

    assert_eq!(result.status, OptimizerStatus::MaxEvaluations);
    assert_eq!(driver.state(), DriverState::MaxEvaluations);
    assert!(result.evaluations <= 20);
    assert!(backend.submissions() <= 20);
    assert_eq!(backend.submissions(), result.evaluations);
    assert!(result.failure.is_none());
}

#[tokio::test]
async fn test_trace_can_be_omitted() {
    let config = RunConfig {
        record_trace: false,
        ..descent_config(5)
    };
    let (driver, result) = run(Arc::new(parabola()), "parabola", vec![0.0], config).await;

    assert!(result.trace.is_none());
    assert_eq!(driver.trace().len(), 5);
}

// ---------------------------------------------------------------------------
// Gradients
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_parameter_shift_on_periodic_objective() {
    let backend = AnalyticBackend::new().with_benchmarks();
    let config = RunConfig {
        max_iterations: 300,
        convergence_tolerance: 1e-8,
        gradient: GradientStrategy::parameter_shift(),
        optimizer: OptimizerConfig::GradientDescent {
            learning_rate: 0.4,
            finite_diff_epsilon: 1e-4,
        },
        ..RunConfig::default()
    };
    let (_, result) = run(Arc::new(backend), "sinusoid", vec![2.0, -2.5], config).await;

    // sum cos(x_i) is minimised at x_i = +-pi.
    assert_eq!(result.status, OptimizerStatus::Converged);
    for x in &result.parameters {
        assert!((x.abs() - std::f64::consts::PI).abs() < 1e-3, "{x}");
    }
    assert!((result.value.unwrap() + 2.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_gradient_costs_two_jobs_per_parameter() {
    let backend = Arc::new(AnalyticBackend::new().with_benchmarks());
    let (_, result) = run(
        backend.clone(),
        "sinusoid",
        vec![0.3, 0.7, 1.1],
        RunConfig {
            gradient: GradientStrategy::parameter_shift(),
            ..descent_config(1)
        },
    )
    .await;

    assert_eq!(result.nit, 1);
    assert_eq!(backend.submissions(), 1 + 2 * 3);
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_noisy_runs_are_reproducible() {
    let config = RunConfig {
        max_iterations: 40,
        gradient: GradientStrategy::None,
        optimizer: OptimizerConfig::Spsa {
            a: 0.2,
            c: 0.1,
            alpha: 0.602,
            gamma: 0.101,
            stability: 10.0,
            seed: 7,
        },
        ..RunConfig::default()
    };
    let noisy = || Arc::new(AnalyticBackend::new().with_benchmarks().with_shot_noise(2000, 42));

    let (_, first) = run(noisy(), "quadratic", vec![0.0, 0.0], config.clone()).await;
    let (_, second) = run(noisy(), "quadratic", vec![0.0, 0.0], config).await;

    assert_eq!(first.parameters, second.parameters);
    assert_eq!(first.value, second.value);
    assert_eq!(first.trace, second.trace);
    assert_eq!(first.evaluations, second.evaluations);
}

#[tokio::test]
async fn test_custom_optimizer_replaces_configured_one() {
    let mut driver = VariationalDriver::new(
        Arc::new(AnalyticBackend::new().with_benchmarks()),
        ProblemDescriptor::new("quadratic"),
        vec![0.0, 0.0],
        RunConfig {
            gradient: GradientStrategy::None,
            ..RunConfig::default()
        },
    )
    .unwrap()
    .with_optimizer(Box::new(Spsa::new().with_seed(1).with_max_iterations(10).with_tolerance(0.0)));

    let result = driver.run().await.unwrap();
    assert_eq!(result.optimizer.name, "spsa");
    assert_eq!(result.status, OptimizerStatus::MaxIterations);
    assert_eq!(result.nit, 10);
}

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bounded_run_stays_inside() {
    let config = RunConfig {
        bounds: Some(Bounds::uniform(2, -1.0, 1.0).unwrap()),
        gradient: GradientStrategy::None,
        ..RunConfig::default()
    };
    let mut driver = VariationalDriver::new(
        Arc::new(AnalyticBackend::new().with_benchmarks()),
        ProblemDescriptor::new("quadratic"),
        vec![0.0, 0.0],
        config,
    )
    .unwrap()
    .with_optimizer(Box::new(NelderMead::new().with_max_iterations(100)));

    let result = driver.run().await.unwrap();
    assert!(result.failure.is_none());
    for record in driver.trace() {
        assert!(record.parameters.iter().all(|p| (-1.0..=1.0).contains(p)));
    }
    assert!(result.parameters.iter().all(|p| (-1.0..=1.0).contains(p)));
    // f(0, 0) = 18; the best point in the box is (1, 1) with f = 8.
    assert!(result.value.unwrap() < 18.0);
}

#[tokio::test]
async fn test_bounded_finite_differences_stay_inside() {
    // Any job outside [0, 1] fails, so a single stray shifted point ends the run.
    let backend = AnalyticBackend::new()
        .with_function("bowl", |x| vec![(x[0] - 2.0).powi(2)])
        .with_failure_predicate(|x| !(0.0..=1.0).contains(&x[0]));
    let config = RunConfig {
        bounds: Some(Bounds::uniform(1, 0.0, 1.0).unwrap()),
        ..descent_config(50)
    };
    let (_, result) = run(Arc::new(backend), "bowl", vec![0.5], config).await;

    assert!(result.failure.is_none(), "{:?}", result.failure);
    assert_eq!(result.status, OptimizerStatus::Converged);
    assert_eq!(result.parameters, vec![1.0]);
    // The one-sided difference at the edge still points out of the box.
    let last = result.trace.as_ref().and_then(|t| t.last()).unwrap();
    assert!((last.gradient_norm.unwrap() - 2.0).abs() < 1e-2);
}

#[tokio::test]
async fn test_parameter_shift_leaving_bounds_fails_run() {
    let backend = Arc::new(AnalyticBackend::new().with_benchmarks());
    let config = RunConfig {
        bounds: Some(Bounds::uniform(1, 0.0, 1.0).unwrap()),
        gradient: GradientStrategy::parameter_shift(),
        ..descent_config(50)
    };
    let (_, result) = run(backend.clone(), "sinusoid", vec![0.5], config).await;

    assert_eq!(result.status, OptimizerStatus::Failed);
    let failure = result.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::OutOfBounds);
    assert_eq!(failure.iteration, 0);
    // Only the value at the starting point was submitted.
    assert_eq!(backend.submissions(), 1);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failed_job_is_reported() {
    let backend = parabola().with_failure_predicate(|x| x[0] > 1.0);
    let (driver, result) = run(Arc::new(backend), "parabola", vec![0.0], descent_config(200)).await;

    assert_eq!(result.status, OptimizerStatus::Failed);
    assert_eq!(driver.state(), DriverState::Failed);
    let failure = result.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::Execution);
    assert!(failure.message.contains("failed at"));
    assert_eq!(failure.iteration, driver.trace().len());
    assert!(!driver.trace().is_empty());
}

fn walled_parabola() -> AnalyticBackend {
    parabola().with_failure_predicate(|x| x[0] > 1.0)
}

fn simplex_config(failure_policy: FailurePolicy) -> RunConfig {
    RunConfig {
        gradient: GradientStrategy::None,
        failure_policy,
        ..RunConfig::default()
    }
}

#[tokio::test]
async fn test_abort_policy_ends_run_on_failed_job() {
    let mut driver = VariationalDriver::new(
        Arc::new(walled_parabola()),
        ProblemDescriptor::new("parabola"),
        vec![0.0],
        simplex_config(FailurePolicy::Abort),
    )
    .unwrap()
    .with_optimizer(Box::new(NelderMead::new().with_max_iterations(100)));

    let result = driver.run().await.unwrap();
    assert_eq!(result.status, OptimizerStatus::Failed);
    assert_eq!(result.failure.unwrap().kind, ErrorKind::Execution);
    assert!(result.skipped_evaluations.is_empty());
}

#[tokio::test]
async fn test_non_improving_policy_keeps_running() {
    let mut driver = VariationalDriver::new(
        Arc::new(walled_parabola()),
        ProblemDescriptor::new("parabola"),
        vec![0.0],
        simplex_config(FailurePolicy::NonImproving),
    )
    .unwrap()
    .with_optimizer(Box::new(NelderMead::new().with_max_iterations(100)));

    let result = driver.run().await.unwrap();
    assert!(result.failure.is_none(), "{:?}", result.failure);
    assert_ne!(result.status, OptimizerStatus::Failed);
    assert!(!result.skipped_evaluations.is_empty());
    assert_eq!(result.skipped_evaluations.len(), driver.skipped_evaluations().len());
    assert!(
        result
            .skipped_evaluations
            .iter()
            .all(|s| s.kind == ErrorKind::Execution)
    );

    // The best point found lies on the feasible side of the wall.
    assert!(result.parameters[0] <= 1.0);
    let value = result.value.unwrap();
    assert!(value.is_finite() && value < 9.0);
}

/// Fails the first `failures` submissions as transient errors.
struct Flaky {
    inner: AnalyticBackend,
    failures: AtomicUsize,
}

#[async_trait]
impl Backend for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn availability(&self) -> HalResult<BackendAvailability> {
        self.inner.availability().await
    }

    async fn submit(&self, request: &EvaluationRequest) -> HalResult<JobId> {
        let left = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if left.is_ok() {
            return Err(HalError::SubmissionFailed("queue full".into()));
        }
        self.inner.submit(request).await
    }

    async fn status(&self, job_id: &JobId) -> HalResult<JobStatus> {
        self.inner.status(job_id).await
    }

    async fn result(&self, job_id: &JobId) -> HalResult<Payload> {
        self.inner.result(job_id).await
    }

    async fn cancel(&self, job_id: &JobId) -> HalResult<()> {
        self.inner.cancel(job_id).await
    }
}

#[tokio::test]
async fn test_retries_count_as_one_job() {
    let backend = Arc::new(Flaky {
        inner: parabola(),
        failures: AtomicUsize::new(3),
    });
    let config = RunConfig {
        retry: RetryPolicy::new(5, Duration::from_millis(1)),
        ..descent_config(3)
    };
    let (_, result) = run(backend.clone(), "parabola", vec![0.0], config).await;

    assert_eq!(result.status, OptimizerStatus::MaxIterations);
    assert_eq!(result.evaluations, 9);
    assert_eq!(backend.inner.submissions(), 9);
}

#[tokio::test]
async fn test_exhausted_retries_fail_run() {
    let backend = Arc::new(Flaky {
        inner: parabola(),
        failures: AtomicUsize::new(10),
    });
    let config = RunConfig {
        retry: RetryPolicy::new(1, Duration::from_millis(1)),
        ..descent_config(3)
    };
    let (_, result) = run(backend, "parabola", vec![0.0], config).await;

    let failure = result.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::Submission);
    assert_eq!(failure.iteration, 0);
}

// ---------------------------------------------------------------------------
// Cancellation and time
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_cancellation_keeps_completed_iterations() {
    let backend = parabola().with_latency(Duration::from_millis(50));
    let mut driver = VariationalDriver::new(
        Arc::new(backend),
        ProblemDescriptor::new("parabola"),
        vec![0.0],
        descent_config(200),
    )
    .unwrap();

    let handle = driver.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.cancel();
    });

    let result = driver.run().await.unwrap();
    assert_eq!(result.status, OptimizerStatus::Failed);
    assert_eq!(driver.state(), DriverState::Failed);

    let failure = result.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::Cancelled);
    let trace = result.trace.unwrap();
    assert!(!trace.is_empty());
    assert_eq!(failure.iteration, trace.len());
}

#[tokio::test(start_paused = true)]
async fn test_wall_clock_budget() {
    let backend = parabola().with_latency(Duration::from_millis(50));
    let config = RunConfig {
        wall_clock_budget_ms: Some(400),
        ..descent_config(200)
    };
    let (driver, result) = run(Arc::new(backend), "parabola", vec![0.0], config).await;

    assert_eq!(result.status, OptimizerStatus::MaxEvaluations);
    assert_eq!(driver.state(), DriverState::MaxEvaluations);
    assert!(result.failure.is_none());
    assert!(result.nit > 0);
}

#[tokio::test(start_paused = true)]
async fn test_job_timeout_fails_run() {
    let backend = parabola().with_latency(Duration::from_secs(5));
    let config = RunConfig {
        job_timeout_ms: Some(100),
        ..descent_config(200)
    };
    let (_, result) = run(Arc::new(backend), "parabola", vec![0.0], config).await;

    let failure = result.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::Timeout);
    assert_eq!(failure.iteration, 0);
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_run_from_yaml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.yaml");
    std::fs::write(
        &path,
        r#"
max_iterations: 200
convergence_tolerance: 1.0e-6
gradient:
  kind: finite-difference
  epsilon: 0.001
optimizer:
  kind: gradient_descent
  learning_rate: 0.1
"#,
    )
    .unwrap();

    let config = RunConfig::from_file(&path).unwrap();
    assert_eq!(config.gradient, GradientStrategy::finite_difference(1e-3));

    let (_, result) = run(Arc::new(parabola()), "parabola", vec![0.0], config).await;
    assert_eq!(result.status, OptimizerStatus::Converged);

    let json = result.to_json().unwrap();
    assert_eq!(VariationalResult::from_json(&json).unwrap(), result);
}

#[test]
fn test_invalid_config_rejected_at_construction() {
    let config = RunConfig {
        gradient: GradientStrategy::ParameterShift { shift: 0.0 },
        ..RunConfig::default()
    };
    let err = VariationalDriver::new(
        Arc::new(parabola()),
        ProblemDescriptor::new("parabola"),
        vec![0.0],
        config,
    )
    .err()
    .unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
