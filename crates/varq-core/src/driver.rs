//! The variational algorithm driver.
//!
//! The driver owns one run: it validates the setup, hands the optimizer an
//! [`Objective`] that routes every call through the evaluator and gradient
//! supplier, enforces budgets before any job is submitted, records the
//! iteration trace, and freezes the outcome into a [`VariationalResult`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use varq_hal::{Backend, Dispatcher, ProblemDescriptor};
use varq_opt::{
    Bounds, Interrupt, IterationStep, Objective, Optimizer, OptimizerResult, OptimizerStatus,
    SupportLevel,
};

use crate::config::{FailurePolicy, RunConfig};
use crate::error::{AlgorithmError, AlgorithmResult, Budget};
use crate::evaluator::{JobEvaluator, ObjectiveEvaluator};
use crate::gradient::GradientSupplier;
use crate::pool::{CancelHandle, JobPool};
use crate::result::{IterationRecord, OptimizerSummary, RunFailure, VariationalResult};

/// Lifecycle of a [`VariationalDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Initialized,
    Running,
    Converged,
    MaxIterations,
    MaxEvaluations,
    Failed,
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DriverState::Initialized | DriverState::Running)
    }
}

impl From<OptimizerStatus> for DriverState {
    fn from(status: OptimizerStatus) -> Self {
        match status {
            OptimizerStatus::Converged => DriverState::Converged,
            OptimizerStatus::MaxIterations => DriverState::MaxIterations,
            OptimizerStatus::MaxEvaluations => DriverState::MaxEvaluations,
            OptimizerStatus::Failed => DriverState::Failed,
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Initialized => "initialized",
            DriverState::Running => "running",
            DriverState::Converged => "converged",
            DriverState::MaxIterations => "max_iterations",
            DriverState::MaxEvaluations => "max_evaluations",
            DriverState::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Orchestrates optimizer, evaluator and gradient supplier for one run.
pub struct VariationalDriver {
    descriptor: Arc<ProblemDescriptor>,
    initial_point: Vec<f64>,
    config: RunConfig,
    optimizer: Box<dyn Optimizer>,
    pool: Arc<JobPool>,
    evaluator: Arc<dyn ObjectiveEvaluator>,
    gradient: GradientSupplier,
    state: DriverState,
    trace: Vec<IterationRecord>,
    failure: Option<RunFailure>,
    skipped: Vec<RunFailure>,
}

impl VariationalDriver {
    /// Fix the problem, starting point, backend and configuration.
    ///
    /// The optimizer is built from `config.optimizer`; replace it with
    /// [`with_optimizer`](Self::with_optimizer).
    pub fn new(
        backend: Arc<dyn Backend>,
        descriptor: ProblemDescriptor,
        initial_point: Vec<f64>,
        config: RunConfig,
    ) -> AlgorithmResult<Self> {
        config.validate()?;
        let optimizer = config.optimizer.build(config.termination())?;

        let dispatcher = Dispatcher::new(backend).with_retry_policy(config.retry.clone());
        let pool = Arc::new(
            JobPool::new(dispatcher)
                .with_max_evaluations(config.max_evaluations)
                .with_job_timeout(config.job_timeout())
                .with_deduplication(config.deduplicate),
        );
        let descriptor = Arc::new(descriptor);
        let evaluator = Arc::new(JobEvaluator::new(pool.clone(), descriptor.clone()));
        let gradient = GradientSupplier::new(config.gradient, pool.clone(), descriptor.clone())
            .with_bounds(config.bounds.clone());

        Ok(Self {
            descriptor,
            initial_point,
            config,
            optimizer,
            pool,
            evaluator,
            gradient,
            state: DriverState::Initialized,
            trace: Vec::new(),
            failure: None,
            skipped: Vec::new(),
        })
    }

    /// Use a custom optimizer instead of the configured one.
    pub fn with_optimizer(mut self, optimizer: Box<dyn Optimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn descriptor(&self) -> &ProblemDescriptor {
        &self.descriptor
    }

    pub fn evaluator(&self) -> &Arc<dyn ObjectiveEvaluator> {
        &self.evaluator
    }

    /// Completed iterations so far.
    pub fn trace(&self) -> &[IterationRecord] {
        &self.trace
    }

    /// The error that failed the run, if any.
    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    /// Evaluation failures absorbed as non-improving steps.
    pub fn skipped_evaluations(&self) -> &[RunFailure] {
        &self.skipped
    }

    /// Evaluation jobs submitted so far.
    pub fn evaluations(&self) -> usize {
        self.pool.evaluations()
    }

    /// Handle for cancelling the run from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.pool.cancel_handle()
    }

    fn validate(&self) -> AlgorithmResult<()> {
        let n = self.initial_point.len();
        if n == 0 {
            return Err(AlgorithmError::Configuration(
                "initial point has no parameters".into(),
            ));
        }
        if let Some(bounds) = &self.config.bounds {
            bounds.check_dimension(n)?;
        }

        let support = self.optimizer.support_level();
        match (support.bounds, &self.config.bounds) {
            (SupportLevel::Required, None) => {
                return Err(AlgorithmError::Configuration(format!(
                    "{} requires bounds",
                    self.optimizer.name()
                )));
            }
            (SupportLevel::NotSupported, Some(_)) => {
                return Err(AlgorithmError::Configuration(format!(
                    "{} does not support bounds",
                    self.optimizer.name()
                )));
            }
            (SupportLevel::Ignored, Some(_)) => {
                warn!(optimizer = self.optimizer.name(), "bounds are ignored by this optimizer");
            }
            _ => {}
        }
        match (support.gradient, self.gradient.has_gradient()) {
            (SupportLevel::Required, false) => {
                return Err(AlgorithmError::Configuration(format!(
                    "{} requires a gradient strategy",
                    self.optimizer.name()
                )));
            }
            (SupportLevel::Ignored | SupportLevel::NotSupported, true) => {
                warn!(
                    optimizer = self.optimizer.name(),
                    "gradient strategy is ignored by this optimizer"
                );
            }
            _ => {}
        }
        Ok(())
    }

    /// Run the optimization. Valid once per driver.
    ///
    /// Errors are returned only for setup problems found before the first
    /// evaluation. Failures during the run end in a result with status
    /// `Failed` and a failure report.
    #[instrument(skip_all, fields(problem = %self.descriptor, optimizer = self.optimizer.name()))]
    pub async fn run(&mut self) -> AlgorithmResult<VariationalResult> {
        if self.state != DriverState::Initialized {
            return Err(AlgorithmError::InvalidState(format!(
                "run() called on a driver in state {}",
                self.state
            )));
        }
        if let Err(e) = self.validate() {
            self.state = DriverState::Failed;
            return Err(e);
        }

        self.state = DriverState::Running;
        let started_at = Utc::now();
        let clock = Instant::now();
        let wall_clock = self.config.wall_clock_budget();
        self.pool.start_clock(wall_clock);
        info!(
            parameters = self.initial_point.len(),
            max_iterations = self.config.max_iterations,
            max_evaluations = ?self.config.max_evaluations,
            "starting variational run"
        );

        let outcome = {
            let mut objective = DriverObjective {
                evaluator: self.evaluator.as_ref(),
                gradient: &self.gradient,
                bounds: self.config.bounds.as_ref(),
                max_iterations: self.config.max_iterations,
                max_evaluations: self.config.max_evaluations,
                deadline: wall_clock.map(|b| clock + b),
                cancel: self.pool.cancel_handle(),
                failure_policy: self.config.failure_policy,
                trace: &mut self.trace,
                failure: &mut self.failure,
                skipped: &mut self.skipped,
            };
            self.optimizer
                .minimize(&mut objective, &self.initial_point, self.config.bounds.as_ref())
                .await
        };

        let status = self.settle(&outcome);
        self.state = DriverState::from(status);
        let elapsed = clock.elapsed();
        info!(
            status = %status,
            iterations = self.trace.len(),
            evaluations = self.pool.evaluations(),
            skipped = self.skipped.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "variational run finished"
        );

        Ok(self.freeze(outcome, status, started_at, elapsed))
    }

    /// Terminal status from the optimizer outcome and any recorded failure.
    fn settle(&mut self, outcome: &OptimizerResult) -> OptimizerStatus {
        if self.failure.is_some() {
            return OptimizerStatus::Failed;
        }
        if outcome.status == OptimizerStatus::Failed {
            let message = outcome
                .message
                .clone()
                .unwrap_or_else(|| "optimizer failed".to_string());
            self.failure = Some(RunFailure {
                iteration: self.trace.len(),
                error: AlgorithmError::ConvergenceFailure(message),
            });
        }
        outcome.status
    }

    fn freeze(
        &self,
        outcome: OptimizerResult,
        status: OptimizerStatus,
        started_at: chrono::DateTime<Utc>,
        elapsed: Duration,
    ) -> VariationalResult {
        VariationalResult {
            problem: self.descriptor.name.clone(),
            parameters: outcome.x,
            value: outcome.fun.filter(|v| v.is_finite()),
            status,
            evaluations: self.pool.evaluations(),
            nfev: outcome.nfev,
            njev: outcome.njev,
            nit: outcome.nit,
            optimizer: OptimizerSummary {
                name: self.optimizer.name().to_string(),
                settings: self.optimizer.settings(),
            },
            started_at,
            elapsed_secs: elapsed.as_secs_f64(),
            failure: self.failure.as_ref().map(RunFailure::report),
            skipped_evaluations: self.skipped.iter().map(RunFailure::report).collect(),
            trace: self.config.record_trace.then(|| self.trace.clone()),
        }
    }
}

/// What the optimizer sees while the driver is running.
///
/// Every call checks cancellation, the iteration budget, the wall-clock
/// deadline, the job budget and the bounds before anything is submitted.
/// Under [`FailurePolicy::NonImproving`], failed value jobs come back as
/// `+inf`; a failed batch is `+inf` at every point.
struct DriverObjective<'a> {
    evaluator: &'a dyn ObjectiveEvaluator,
    gradient: &'a GradientSupplier,
    bounds: Option<&'a Bounds>,
    max_iterations: usize,
    max_evaluations: Option<usize>,
    deadline: Option<Instant>,
    cancel: CancelHandle,
    failure_policy: FailurePolicy,
    trace: &'a mut Vec<IterationRecord>,
    failure: &'a mut Option<RunFailure>,
    skipped: &'a mut Vec<RunFailure>,
}

impl<'a> DriverObjective<'a> {
    fn admit(&mut self, points: &[&[f64]], jobs: usize) -> Result<(), Interrupt> {
        if self.cancel.is_cancelled() {
            return Err(self.fail(AlgorithmError::Cancelled("run cancelled".into())));
        }
        if self.trace.len() >= self.max_iterations {
            return Err(Interrupt::IterationBudget);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupt::TimeBudget);
        }
        if self
            .max_evaluations
            .is_some_and(|max| self.evaluator.evaluations() + jobs > max)
        {
            return Err(Interrupt::EvaluationBudget);
        }
        if let Some(bounds) = self.bounds {
            if let Some(point) = points.iter().find(|p| !bounds.contains(p)) {
                return Err(self.fail(AlgorithmError::OutOfBounds(format!("{point:?}"))));
            }
        }
        Ok(())
    }

    /// Turn an evaluator error into an interrupt, recording real failures.
    fn absorb(&mut self, err: AlgorithmError) -> Interrupt {
        match err {
            AlgorithmError::BudgetExceeded(Budget::Evaluations) => Interrupt::EvaluationBudget,
            AlgorithmError::BudgetExceeded(Budget::Iterations) => Interrupt::IterationBudget,
            AlgorithmError::BudgetExceeded(Budget::WallClock) => Interrupt::TimeBudget,
            other => self.fail(other),
        }
    }

    /// Record `err` as a non-improving evaluation if the policy allows it.
    fn tolerate(&mut self, err: &AlgorithmError) -> bool {
        let job_failure = matches!(
            err,
            AlgorithmError::Submission(_) | AlgorithmError::Execution(_) | AlgorithmError::Timeout(_)
        );
        if self.failure_policy != FailurePolicy::NonImproving || !job_failure {
            return false;
        }
        warn!(
            iteration = self.trace.len(),
            error = %err,
            "evaluation failed, treating as non-improving"
        );
        self.skipped.push(RunFailure {
            iteration: self.trace.len(),
            error: err.clone(),
        });
        true
    }

    fn fail(&mut self, error: AlgorithmError) -> Interrupt {
        let interrupt = match error {
            AlgorithmError::Cancelled(_) if self.cancel.is_cancelled() => Interrupt::Cancelled,
            ref other => Interrupt::Failed(other.to_string()),
        };
        if self.failure.is_none() {
            warn!(iteration = self.trace.len(), error = %error, "variational run failed");
            *self.failure = Some(RunFailure {
                iteration: self.trace.len(),
                error,
            });
        }
        interrupt
    }

    fn finite(&mut self, values: &[f64]) -> Result<(), Interrupt> {
        match values.iter().find(|v| !v.is_finite()) {
            Some(v) => Err(self.fail(AlgorithmError::ConvergenceFailure(format!(
                "objective returned {v}"
            )))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<'a> Objective for DriverObjective<'a> {
    async fn value(&mut self, point: &[f64]) -> Result<f64, Interrupt> {
        self.admit(&[point], 1)?;
        let value = match self.evaluator.evaluate(point).await {
            Ok(v) => v,
            Err(e) if self.tolerate(&e) => return Ok(f64::INFINITY),
            Err(e) => return Err(self.absorb(e)),
        };
        self.finite(&[value])?;
        Ok(value)
    }

    async fn values(&mut self, points: &[Vec<f64>]) -> Result<Vec<f64>, Interrupt> {
        let refs: Vec<&[f64]> = points.iter().map(Vec::as_slice).collect();
        self.admit(&refs, points.len())?;
        let values = match self.evaluator.evaluate_batch(points).await {
            Ok(v) => v,
            Err(e) if self.tolerate(&e) => return Ok(vec![f64::INFINITY; points.len()]),
            Err(e) => return Err(self.absorb(e)),
        };
        self.finite(&values)?;
        Ok(values)
    }

    fn has_gradient(&self) -> bool {
        self.gradient.has_gradient()
    }

    async fn gradient(&mut self, point: &[f64]) -> Result<Vec<f64>, Interrupt> {
        self.admit(&[point], self.gradient.cost(point))?;
        let gradient = match self.gradient.gradient(point).await {
            Ok(g) => g,
            Err(e) => return Err(self.absorb(e)),
        };
        self.finite(&gradient)?;
        Ok(gradient)
    }

    fn on_iteration(&mut self, step: &IterationStep<'_>) {
        self.trace.push(IterationRecord {
            index: self.trace.len(),
            parameters: step.point.to_vec(),
            value: step.value,
            gradient_norm: step.gradient_norm,
            evaluations: self.evaluator.evaluations(),
        });
    }
}
