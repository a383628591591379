//! The optimizer contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bounds::{Bounds, project};
use crate::objective::{Interrupt, IterationStep, Objective};

/// How an optimizer treats one kind of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportLevel {
    /// Passing the input is an error.
    NotSupported,
    /// The input is accepted and ignored.
    Ignored,
    /// The input is used when given.
    Supported,
    /// The input must be given.
    Required,
}

impl SupportLevel {
    /// Whether the optimizer uses the input at all.
    pub fn is_used(&self) -> bool {
        matches!(self, SupportLevel::Supported | SupportLevel::Required)
    }
}

/// Support levels for the optional inputs of [`Optimizer::minimize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerSupport {
    pub gradient: SupportLevel,
    pub bounds: SupportLevel,
    pub initial_point: SupportLevel,
}

/// Stopping rules shared by all optimizers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Termination {
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Maximum number of objective evaluations, if limited.
    pub max_evaluations: Option<usize>,
    /// Convergence tolerance; its meaning depends on the optimizer.
    pub tolerance: f64,
}

impl Default for Termination {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_evaluations: None,
            tolerance: 1e-6,
        }
    }
}

impl Termination {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            max_evaluations: None,
            tolerance,
        }
    }

    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = Some(max_evaluations);
        self
    }
}

/// A classical optimizer.
///
/// `minimize` may be called any number of times on the same instance.
/// Every call starts from `x0` with fresh internal state, so two calls
/// with the same inputs make the same sequence of objective requests.
#[async_trait]
pub trait Optimizer: Send + Sync {
    /// Optimizer name.
    fn name(&self) -> &str;

    /// Support levels for gradient, bounds and initial point.
    fn support_level(&self) -> OptimizerSupport;

    /// Settings as a JSON object, for reporting.
    fn settings(&self) -> serde_json::Value;

    /// Minimize `objective` starting from `x0`.
    ///
    /// Evaluated points always lie inside `bounds`. The run stops at the
    /// first [`Interrupt`] from the objective and reports the best point
    /// seen so far.
    async fn minimize(
        &self,
        objective: &mut dyn Objective,
        x0: &[f64],
        bounds: Option<&Bounds>,
    ) -> crate::OptimizerResult;
}

/// Counting wrapper used by the optimizers in this crate.
///
/// Enforces `max_evaluations` locally and clips every point it is asked
/// to evaluate.
pub(crate) struct Tracked<'a> {
    objective: &'a mut dyn Objective,
    bounds: Option<&'a Bounds>,
    max_evaluations: Option<usize>,
    pub(crate) nfev: usize,
    pub(crate) njev: usize,
}

impl<'a> Tracked<'a> {
    pub(crate) fn new(
        objective: &'a mut dyn Objective,
        bounds: Option<&'a Bounds>,
        termination: &Termination,
    ) -> Self {
        Self {
            objective,
            bounds,
            max_evaluations: termination.max_evaluations,
            nfev: 0,
            njev: 0,
        }
    }

    pub(crate) fn clip(&self, point: &[f64]) -> Vec<f64> {
        project(self.bounds, point)
    }

    fn reserve(&mut self, count: usize) -> Result<(), Interrupt> {
        match self.max_evaluations {
            Some(max) if self.nfev + count > max => Err(Interrupt::EvaluationBudget),
            _ => Ok(()),
        }
    }

    pub(crate) async fn value(&mut self, point: &[f64]) -> Result<f64, Interrupt> {
        self.reserve(1)?;
        let point = self.clip(point);
        let value = self.objective.value(&point).await?;
        self.nfev += 1;
        Ok(value)
    }

    pub(crate) async fn values(&mut self, points: &[Vec<f64>]) -> Result<Vec<f64>, Interrupt> {
        self.reserve(points.len())?;
        let points: Vec<Vec<f64>> = points.iter().map(|p| self.clip(p)).collect();
        let values = self.objective.values(&points).await?;
        self.nfev += points.len();
        Ok(values)
    }

    pub(crate) fn has_gradient(&self) -> bool {
        self.objective.has_gradient()
    }

    pub(crate) async fn gradient(&mut self, point: &[f64]) -> Result<Vec<f64>, Interrupt> {
        let point = self.clip(point);
        let gradient = self.objective.gradient(&point).await?;
        self.njev += 1;
        Ok(gradient)
    }

    pub(crate) fn record(&mut self, step: IterationStep<'_>) {
        self.objective.on_iteration(&step);
    }
}

/// Euclidean norm.
pub(crate) fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Euclidean distance between two points.
pub(crate) fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::FnObjective;

    #[tokio::test]
    async fn test_tracked_enforces_evaluation_budget() {
        let mut f = FnObjective::new(|x| x[0]);
        let termination = Termination::new(10, 1e-6).with_max_evaluations(2);
        let mut tracked = Tracked::new(&mut f, None, &termination);

        assert!(tracked.value(&[1.0]).await.is_ok());
        assert_eq!(
            tracked.values(&[vec![1.0], vec![2.0]]).await,
            Err(Interrupt::EvaluationBudget)
        );
        assert!(tracked.value(&[1.0]).await.is_ok());
        assert_eq!(tracked.value(&[1.0]).await, Err(Interrupt::EvaluationBudget));
        assert_eq!(tracked.nfev, 2);
        drop(tracked);
        assert_eq!(f.evaluations(), 2);
    }

    #[tokio::test]
    async fn test_tracked_clips_points() {
        let bounds = Bounds::uniform(1, -1.0, 1.0).unwrap();
        let mut f = FnObjective::new(|x| x[0]);
        let termination = Termination::default();
        let mut tracked = Tracked::new(&mut f, Some(&bounds), &termination);
        assert_eq!(tracked.value(&[5.0]).await, Ok(1.0));
    }

    #[test]
    fn test_norms() {
        assert!((norm(&[3.0, 4.0]) - 5.0).abs() < 1e-12);
        assert!((distance(&[1.0, 1.0], &[4.0, 5.0]) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_support_level() {
        assert!(SupportLevel::Required.is_used());
        assert!(!SupportLevel::Ignored.is_used());
    }
}
