//! Projected gradient descent.
//!
//! Uses the objective's gradient when it has one and central finite
//! differences otherwise. Iterates are clipped into the bounds after
//! every step.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::bounds::Bounds;
use crate::objective::{Interrupt, IterationStep, Objective};
use crate::optimizer::{
    Optimizer, OptimizerSupport, SupportLevel, Termination, Tracked, distance, norm,
};
use crate::result::{OptimizerResult, OptimizerStatus};

/// Fixed-step gradient descent.
///
/// Converges when the step between consecutive iterates is shorter than
/// the tolerance.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    /// Step size.
    pub learning_rate: f64,
    /// Offset used for finite differences.
    pub finite_diff_epsilon: f64,
    /// Stopping rules.
    pub termination: Termination,
}

impl Default for GradientDescent {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            finite_diff_epsilon: 1e-4,
            termination: Termination::default(),
        }
    }
}

impl GradientDescent {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            ..Self::default()
        }
    }

    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = termination;
        self
    }

    pub fn with_finite_diff_epsilon(mut self, epsilon: f64) -> Self {
        self.finite_diff_epsilon = epsilon;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.termination.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.termination.tolerance = tolerance;
        self
    }

    async fn finite_difference(
        &self,
        tracked: &mut Tracked<'_>,
        x: &[f64],
    ) -> Result<Vec<f64>, Interrupt> {
        let n = x.len();
        let mut points = Vec::with_capacity(2 * n);
        for i in 0..n {
            let mut plus = x.to_vec();
            plus[i] += self.finite_diff_epsilon;
            let mut minus = x.to_vec();
            minus[i] -= self.finite_diff_epsilon;
            points.push(tracked.clip(&plus));
            points.push(tracked.clip(&minus));
        }

        let values = tracked.values(&points).await?;

        Ok((0..n)
            .map(|i| {
                let width = points[2 * i][i] - points[2 * i + 1][i];
                if width > 0.0 {
                    (values[2 * i] - values[2 * i + 1]) / width
                } else {
                    0.0
                }
            })
            .collect())
    }
}

#[async_trait]
impl Optimizer for GradientDescent {
    fn name(&self) -> &str {
        "gradient_descent"
    }

    fn support_level(&self) -> OptimizerSupport {
        OptimizerSupport {
            gradient: SupportLevel::Supported,
            bounds: SupportLevel::Supported,
            initial_point: SupportLevel::Required,
        }
    }

    fn settings(&self) -> serde_json::Value {
        json!({
            "learning_rate": self.learning_rate,
            "finite_diff_epsilon": self.finite_diff_epsilon,
            "max_iterations": self.termination.max_iterations,
            "max_evaluations": self.termination.max_evaluations,
            "tolerance": self.termination.tolerance,
        })
    }

    async fn minimize(
        &self,
        objective: &mut dyn Objective,
        x0: &[f64],
        bounds: Option<&Bounds>,
    ) -> OptimizerResult {
        let mut tracked = Tracked::new(objective, bounds, &self.termination);
        let mut x = tracked.clip(x0);
        let mut best: Option<(Vec<f64>, f64)> = None;
        let mut jac = None;
        let mut nit = 0;

        let stop = loop {
            if nit >= self.termination.max_iterations {
                break Err(OptimizerStatus::MaxIterations);
            }

            let value = match tracked.value(&x).await {
                Ok(v) => v,
                Err(interrupt) => break Ok(interrupt),
            };
            if best.as_ref().is_none_or(|(_, f)| value < *f) {
                best = Some((x.clone(), value));
            }

            let gradient = if tracked.has_gradient() {
                tracked.gradient(&x).await
            } else {
                self.finite_difference(&mut tracked, &x).await
            };
            let gradient = match gradient {
                Ok(g) => g,
                Err(interrupt) => break Ok(interrupt),
            };
            let gradient_norm = norm(&gradient);

            tracked.record(IterationStep {
                iteration: nit,
                point: &x,
                value,
                gradient_norm: Some(gradient_norm),
            });
            nit += 1;
            debug!(iteration = nit, value, gradient_norm, "gradient descent step");

            let next: Vec<f64> = x
                .iter()
                .zip(&gradient)
                .map(|(xi, gi)| xi - self.learning_rate * gi)
                .collect();
            let next = tracked.clip(&next);
            jac = Some(gradient);

            if distance(&next, &x) < self.termination.tolerance {
                break Err(OptimizerStatus::Converged);
            }
            x = next;
        };

        let (status, message) = match stop {
            Err(status) => (status, None),
            Ok(interrupt) => (interrupt.status(), Some(interrupt.to_string())),
        };
        let (x, fun) = match best {
            Some((x, f)) => (x, Some(f)),
            None => (x, None),
        };

        OptimizerResult {
            x,
            fun,
            jac,
            nfev: tracked.nfev,
            njev: tracked.njev,
            nit,
            status,
            message,
        }
    }
}
