//! Gradient estimation from shifted evaluations.
//!
//! Every rule is a plan of `2 * n` shifted requests followed by a fixed
//! linear reduction. The parameter-shift rule with shift `s` computes
//!
//! ```text
//! df/dθi = (f(θ + s·ei) - f(θ - s·ei)) / (2 sin s)
//! ```
//!
//! which is exact for objectives built from gates generated by Pauli
//! operators. Finite differences use the same plan with `s = ε` and a
//! `2ε` denominator.
//!
//! With bounds, finite-difference points are clipped into the box and each
//! component is divided by the width actually sampled. Parameter-shift
//! points are never moved, since the rule is only exact at `±s`; a shifted
//! point outside the box makes the gradient fail with
//! [`AlgorithmError::OutOfBounds`].

use std::f64::consts::FRAC_PI_2;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use varq_hal::{EvaluationKind, EvaluationRequest, ProblemDescriptor};
use varq_opt::Bounds;

use crate::error::{AlgorithmError, AlgorithmResult};
use crate::evaluator::objective_value;
use crate::pool::JobPool;

fn default_shift() -> f64 {
    FRAC_PI_2
}

pub(crate) fn default_epsilon() -> f64 {
    1e-3
}

/// How gradients are computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GradientStrategy {
    /// Analytic parameter-shift rule.
    #[serde(alias = "analytic")]
    ParameterShift {
        #[serde(default = "default_shift")]
        shift: f64,
    },
    /// Central finite differences.
    #[serde(alias = "finite-difference")]
    FiniteDifference {
        #[serde(default = "default_epsilon")]
        epsilon: f64,
    },
    /// No gradient; optimizers fall back to derivative-free behaviour.
    None,
}

impl Default for GradientStrategy {
    fn default() -> Self {
        GradientStrategy::ParameterShift {
            shift: default_shift(),
        }
    }
}

impl GradientStrategy {
    pub fn parameter_shift() -> Self {
        Self::default()
    }

    pub fn finite_difference(epsilon: f64) -> Self {
        GradientStrategy::FiniteDifference { epsilon }
    }

    /// Whether this strategy produces gradients.
    pub fn has_gradient(&self) -> bool {
        !matches!(self, GradientStrategy::None)
    }

    /// Reject shifts that make the reduction singular.
    pub fn validate(&self) -> AlgorithmResult<()> {
        match *self {
            GradientStrategy::ParameterShift { shift } => {
                if !shift.is_finite() || shift.sin().abs() < 1e-12 {
                    return Err(AlgorithmError::Configuration(format!(
                        "parameter shift {shift} has sin(s) = 0"
                    )));
                }
            }
            GradientStrategy::FiniteDifference { epsilon } => {
                if !(epsilon.is_finite() && epsilon > 0.0) {
                    return Err(AlgorithmError::Configuration(format!(
                        "finite difference epsilon must be positive, got {epsilon}"
                    )));
                }
            }
            GradientStrategy::None => {}
        }
        Ok(())
    }

    /// Shifted requests and reduction for a gradient at `parameters`.
    ///
    /// Returns `None` for [`GradientStrategy::None`].
    pub fn plan(&self, parameters: &[f64]) -> Option<GradientPlan> {
        self.plan_within(parameters, None)
    }

    /// Like [`plan`](Self::plan), with finite-difference points clipped
    /// into `bounds`.
    pub fn plan_within(
        &self,
        parameters: &[f64],
        bounds: Option<&Bounds>,
    ) -> Option<GradientPlan> {
        let (shift, clip) = match *self {
            GradientStrategy::ParameterShift { shift } => (shift, None),
            GradientStrategy::FiniteDifference { epsilon } => (epsilon, bounds),
            GradientStrategy::None => return None,
        };

        let n = parameters.len();
        let mut terms = Vec::with_capacity(2 * n);
        let mut denominators = Vec::with_capacity(n);
        for i in 0..n {
            let mut sampled = [0.0; 2];
            for (slot, signed) in [shift, -shift].into_iter().enumerate() {
                let mut point = parameters.to_vec();
                point[i] += signed;
                if let Some(bounds) = clip {
                    point = bounds.clip(&point);
                }
                sampled[slot] = point[i];
                terms.push(PlannedTerm {
                    point,
                    kind: EvaluationKind::GradientComponent {
                        parameter: i,
                        shift: signed,
                    },
                });
            }
            denominators.push(match *self {
                GradientStrategy::ParameterShift { shift } => 2.0 * shift.sin(),
                _ => sampled[0] - sampled[1],
            });
        }

        Some(GradientPlan {
            terms,
            denominators,
        })
    }
}

/// One shifted evaluation of a [`GradientPlan`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTerm {
    pub point: Vec<f64>,
    pub kind: EvaluationKind,
}

/// Deterministic set of shifted evaluations plus their reduction.
///
/// Terms are ordered `θ0 + s, θ0 - s, θ1 + s, θ1 - s, ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientPlan {
    terms: Vec<PlannedTerm>,
    denominators: Vec<f64>,
}

impl GradientPlan {
    pub fn terms(&self) -> &[PlannedTerm] {
        &self.terms
    }

    /// Number of evaluations the plan needs.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Evaluation requests, in plan order.
    pub fn requests(&self, descriptor: &Arc<ProblemDescriptor>) -> Vec<EvaluationRequest> {
        self.terms
            .iter()
            .map(|t| EvaluationRequest::new(descriptor.clone(), t.point.clone(), t.kind))
            .collect()
    }

    /// Combine term values, in plan order, into the gradient.
    ///
    /// A component whose clipped points coincide is zero.
    pub fn reduce(&self, values: &[f64]) -> Vec<f64> {
        values
            .chunks_exact(2)
            .zip(&self.denominators)
            .map(|(pair, &d)| if d != 0.0 { (pair[0] - pair[1]) / d } else { 0.0 })
            .collect()
    }
}

/// Produces gradients by fanning a [`GradientPlan`] out through the pool.
pub struct GradientSupplier {
    strategy: GradientStrategy,
    pool: Arc<JobPool>,
    descriptor: Arc<ProblemDescriptor>,
    bounds: Option<Bounds>,
}

impl GradientSupplier {
    pub fn new(
        strategy: GradientStrategy,
        pool: Arc<JobPool>,
        descriptor: Arc<ProblemDescriptor>,
    ) -> Self {
        Self {
            strategy,
            pool,
            descriptor,
            bounds: None,
        }
    }

    /// Keep every shifted evaluation inside `bounds`.
    pub fn with_bounds(mut self, bounds: Option<Bounds>) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn strategy(&self) -> &GradientStrategy {
        &self.strategy
    }

    pub fn has_gradient(&self) -> bool {
        self.strategy.has_gradient()
    }

    /// Jobs a gradient at `parameters` would submit.
    pub fn cost(&self, parameters: &[f64]) -> usize {
        self.strategy
            .plan_within(parameters, self.bounds.as_ref())
            .map_or(0, |plan| self.pool.cost(&plan.requests(&self.descriptor)))
    }

    /// Gradient at `parameters`, same length as `parameters`.
    ///
    /// Fails as a whole if any shifted evaluation fails, and before any
    /// job is submitted if a shifted point leaves the bounds.
    pub async fn gradient(&self, parameters: &[f64]) -> AlgorithmResult<Vec<f64>> {
        let plan = self
            .strategy
            .plan_within(parameters, self.bounds.as_ref())
            .ok_or_else(|| {
                AlgorithmError::Configuration("gradient requested with strategy none".into())
            })?;
        if let Some(bounds) = &self.bounds {
            if let Some(term) = plan.terms().iter().find(|t| !bounds.contains(&t.point)) {
                return Err(AlgorithmError::OutOfBounds(format!(
                    "shifted gradient point {:?}",
                    term.point
                )));
            }
        }

        let payloads = self.pool.fan_out(plan.requests(&self.descriptor)).await?;
        let values = payloads
            .into_iter()
            .map(objective_value)
            .collect::<AlgorithmResult<Vec<f64>>>()?;
        let gradient = plan.reduce(&values);
        debug!(
            jobs = plan.len(),
            norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt(),
            "gradient evaluated"
        );
        Ok(gradient)
    }
}
