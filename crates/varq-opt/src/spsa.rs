//! Simultaneous perturbation stochastic approximation.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::debug;

use crate::bounds::Bounds;
use crate::objective::{Interrupt, IterationStep, Objective};
use crate::optimizer::{Optimizer, OptimizerSupport, SupportLevel, Termination, Tracked, norm};
use crate::result::{OptimizerResult, OptimizerStatus};

/// SPSA optimizer.
///
/// Estimates the gradient from two evaluations per iteration regardless
/// of dimension. Gain sequences follow `a / (k + 1 + A)^alpha` and
/// `c / (k + 1)^gamma`. The perturbation stream is reseeded on every
/// call, so runs are reproducible.
#[derive(Debug, Clone)]
pub struct Spsa {
    pub a: f64,
    pub c: f64,
    pub alpha: f64,
    pub gamma: f64,
    /// Stability constant `A`.
    pub stability: f64,
    pub seed: u64,
    pub termination: Termination,
}

impl Default for Spsa {
    fn default() -> Self {
        Self {
            a: 0.2,
            c: 0.1,
            alpha: 0.602,
            gamma: 0.101,
            stability: 10.0,
            seed: 0,
            termination: Termination::default(),
        }
    }
}

impl Spsa {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gains(mut self, a: f64, c: f64) -> Self {
        self.a = a;
        self.c = c;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = termination;
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

    fn gains(&self, k: usize) -> (f64, f64) {
        let k = k as f64 + 1.0;
        (
            self.a / (k + self.stability).powf(self.alpha),
            self.c / k.powf(self.gamma),
        )
    }
}

#[async_trait]
impl Optimizer for Spsa {
    fn name(&self) -> &str {
        "spsa"
    }

    fn support_level(&self) -> OptimizerSupport {
        OptimizerSupport {
            gradient: SupportLevel::Ignored,
            bounds: SupportLevel::Supported,
            initial_point: SupportLevel::Required,
        }
    }

    fn settings(&self) -> serde_json::Value {
        json!({
            "a": self.a,
            "c": self.c,
            "alpha": self.alpha,
            "gamma": self.gamma,
            "stability": self.stability,
            "seed": self.seed,
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
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut tracked = Tracked::new(objective, bounds, &self.termination);
        let mut x = tracked.clip(x0);
        let mut best: Option<(Vec<f64>, f64)> = None;
        let mut previous: Option<f64> = None;
        let mut nit = 0;

        let stop: Result<Interrupt, OptimizerStatus> = loop {
            if nit >= self.termination.max_iterations {
                break Err(OptimizerStatus::MaxIterations);
            }
            let (ak, ck) = self.gains(nit);
            let delta: Vec<f64> = (0..x.len())
                .map(|_| if rng.gen_bool(0.5) { 1.0 } else { -1.0 })
                .collect();

            let plus: Vec<f64> = x.iter().zip(&delta).map(|(xi, d)| xi + ck * d).collect();
            let minus: Vec<f64> = x.iter().zip(&delta).map(|(xi, d)| xi - ck * d).collect();
            let pair = match tracked.values(&[plus, minus]).await {
                Ok(values) => values,
                Err(interrupt) => break Ok(interrupt),
            };
            let gradient: Vec<f64> = delta
                .iter()
                .map(|d| (pair[0] - pair[1]) / (2.0 * ck * d))
                .collect();

            let next: Vec<f64> = x
                .iter()
                .zip(&gradient)
                .map(|(xi, gi)| xi - ak * gi)
                .collect();
            x = tracked.clip(&next);
            let value = match tracked.value(&x).await {
                Ok(v) => v,
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
            debug!(iteration = nit, value, gradient_norm, "spsa step");

            if best.as_ref().is_none_or(|(_, f)| value < *f) {
                best = Some((x.clone(), value));
            }
            if previous.is_some_and(|p| (value - p).abs() < self.termination.tolerance) {
                break Err(OptimizerStatus::Converged);
            }
            previous = Some(value);
        };

        let (status, message) = match stop {
            Err(status) => (status, None),
            Ok(interrupt) => (interrupt.status(), Some(interrupt.to_string())),
        };
        let (x, fun) = match best {
            Some((x, f)) => (x, Some(f)),
            None => (tracked.clip(x0), None),
        };

        OptimizerResult {
            x,
            fun,
            jac: None,
            nfev: tracked.nfev,
            njev: 0,
            nit,
            status,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::FnObjective;

    #[tokio::test]
    async fn test_same_seed_same_run() {
        let spsa = Spsa::new().with_seed(7).with_max_iterations(30).with_tolerance(0.0);
        let mut f1 = FnObjective::new(|x| x[0].powi(2) + 2.0 * x[1].powi(2));
        let mut f2 = FnObjective::new(|x| x[0].powi(2) + 2.0 * x[1].powi(2));

        let r1 = spsa.minimize(&mut f1, &[1.0, 1.0], None).await;
        let r2 = spsa.minimize(&mut f2, &[1.0, 1.0], None).await;

        assert_eq!(r1, r2);
        assert_eq!(f1.history(), f2.history());
    }

    #[tokio::test]
    async fn test_three_evaluations_per_iteration() {
        let spsa = Spsa::new().with_max_iterations(10).with_tolerance(0.0);
        let mut f = FnObjective::new(|x| x[0].powi(2));
        let result = spsa.minimize(&mut f, &[1.0], None).await;

        assert_eq!(result.status, OptimizerStatus::MaxIterations);
        assert_eq!(result.nit, 10);
        assert_eq!(result.nfev, 30);
    }

    #[tokio::test]
    async fn test_improves_on_start() {
        let spsa = Spsa::new().with_gains(0.5, 0.1).with_max_iterations(200).with_tolerance(0.0);
        let mut f = FnObjective::new(|x| (x[0] - 0.5).powi(2) + (x[1] + 0.5).powi(2));
        let result = spsa.minimize(&mut f, &[2.0, -2.0], None).await;

        assert!(result.fun.unwrap() < 0.1);
    }

    #[test]
    fn test_gain_sequences_decay() {
        let spsa = Spsa::default();
        let (a0, c0) = spsa.gains(0);
        let (a9, c9) = spsa.gains(9);
        assert!(a9 < a0);
        assert!(c9 < c0);
    }
}
