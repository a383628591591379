//! The function an optimizer minimizes.

use async_trait::async_trait;
use thiserror::Error;

use crate::result::OptimizerStatus;

/// Why an objective refused to produce a value.
///
/// Budgets and cancellation are enforced by whoever owns the objective.
/// The optimizer stops at the first interrupt and reports the matching
/// [`OptimizerStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Interrupt {
    /// No evaluation budget left for the request.
    #[error("evaluation budget exhausted")]
    EvaluationBudget,

    /// The iteration budget is used up.
    #[error("iteration budget exhausted")]
    IterationBudget,

    /// The wall-clock budget expired.
    #[error("wall-clock budget exhausted")]
    TimeBudget,

    /// The run was cancelled.
    #[error("run cancelled")]
    Cancelled,

    /// Evaluation failed.
    #[error("objective failed: {0}")]
    Failed(String),
}

impl Interrupt {
    /// Terminal status implied by this interrupt.
    ///
    /// A wall-clock expiry counts as running out of evaluations.
    pub fn status(&self) -> OptimizerStatus {
        match self {
            Interrupt::EvaluationBudget | Interrupt::TimeBudget => OptimizerStatus::MaxEvaluations,
            Interrupt::IterationBudget => OptimizerStatus::MaxIterations,
            Interrupt::Cancelled | Interrupt::Failed(_) => OptimizerStatus::Failed,
        }
    }
}

/// One completed optimizer iteration, reported through
/// [`Objective::on_iteration`].
#[derive(Debug, Clone, Copy)]
pub struct IterationStep<'a> {
    /// Zero-based iteration index.
    pub iteration: usize,
    /// Point the iteration settled on.
    pub point: &'a [f64],
    /// Objective value at `point`.
    pub value: f64,
    /// Gradient norm at `point`, for optimizers that compute one.
    pub gradient_norm: Option<f64>,
}

/// Objective seen by an [`Optimizer`](crate::Optimizer).
///
/// `gradient` is only called when `has_gradient` returns true; gradient
/// based optimizers fall back to finite differences through `values`
/// otherwise.
#[async_trait]
pub trait Objective: Send {
    /// Objective value at `point`.
    async fn value(&mut self, point: &[f64]) -> Result<f64, Interrupt>;

    /// Objective values at several points, in order.
    ///
    /// Implementations may evaluate the points concurrently. The default
    /// evaluates them one by one.
    async fn values(&mut self, points: &[Vec<f64>]) -> Result<Vec<f64>, Interrupt> {
        let mut out = Vec::with_capacity(points.len());
        for point in points {
            out.push(self.value(point).await?);
        }
        Ok(out)
    }

    /// Whether [`Objective::gradient`] is available.
    fn has_gradient(&self) -> bool {
        false
    }

    /// Gradient at `point`.
    async fn gradient(&mut self, _point: &[f64]) -> Result<Vec<f64>, Interrupt> {
        Err(Interrupt::Failed("objective provides no gradient".into()))
    }

    /// Called once per completed iteration.
    fn on_iteration(&mut self, _step: &IterationStep<'_>) {}
}

type ValueFn = Box<dyn FnMut(&[f64]) -> f64 + Send>;
type GradientFn = Box<dyn FnMut(&[f64]) -> Vec<f64> + Send>;

/// Closure-backed [`Objective`], mainly for tests and local use.
pub struct FnObjective {
    value: ValueFn,
    gradient: Option<GradientFn>,
    evaluations: usize,
    history: Vec<(Vec<f64>, f64)>,
}

impl FnObjective {
    /// Wrap a value closure.
    pub fn new(value: impl FnMut(&[f64]) -> f64 + Send + 'static) -> Self {
        Self {
            value: Box::new(value),
            gradient: None,
            evaluations: 0,
            history: Vec::new(),
        }
    }

    /// Add an analytic gradient.
    pub fn with_gradient(mut self, gradient: impl FnMut(&[f64]) -> Vec<f64> + Send + 'static) -> Self {
        self.gradient = Some(Box::new(gradient));
        self
    }

    /// Number of value evaluations so far.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// `(point, value)` of every reported iteration.
    pub fn history(&self) -> &[(Vec<f64>, f64)] {
        &self.history
    }
}

#[async_trait]
impl Objective for FnObjective {
    async fn value(&mut self, point: &[f64]) -> Result<f64, Interrupt> {
        self.evaluations += 1;
        Ok((self.value)(point))
    }

    fn has_gradient(&self) -> bool {
        self.gradient.is_some()
    }

    async fn gradient(&mut self, point: &[f64]) -> Result<Vec<f64>, Interrupt> {
        match self.gradient.as_mut() {
            Some(g) => Ok(g(point)),
            None => Err(Interrupt::Failed("objective provides no gradient".into())),
        }
    }

    fn on_iteration(&mut self, step: &IterationStep<'_>) {
        self.history.push((step.point.to_vec(), step.value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_status() {
        assert_eq!(
            Interrupt::EvaluationBudget.status(),
            OptimizerStatus::MaxEvaluations
        );
        assert_eq!(Interrupt::TimeBudget.status(), OptimizerStatus::MaxEvaluations);
        assert_eq!(
            Interrupt::IterationBudget.status(),
            OptimizerStatus::MaxIterations
        );
        assert_eq!(Interrupt::Cancelled.status(), OptimizerStatus::Failed);
        assert_eq!(
            Interrupt::Failed("x".into()).status(),
            OptimizerStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_fn_objective_counts_and_batches() {
        let mut f = FnObjective::new(|x| x[0] * 2.0);
        let values = f.values(&[vec![1.0], vec![2.0], vec![3.0]]).await.unwrap();
        assert_eq!(values, vec![2.0, 4.0, 6.0]);
        assert_eq!(f.evaluations(), 3);
        assert!(!f.has_gradient());
        assert!(f.gradient(&[1.0]).await.is_err());
    }

    #[tokio::test]
    async fn test_fn_objective_gradient() {
        let mut f = FnObjective::new(|x| x[0].powi(2)).with_gradient(|x| vec![2.0 * x[0]]);
        assert!(f.has_gradient());
        assert_eq!(f.gradient(&[3.0]).await.unwrap(), vec![6.0]);
    }
}
