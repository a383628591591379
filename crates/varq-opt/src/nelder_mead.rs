//! Nelder-Mead simplex search.
//!
//! Derivative-free, which makes it a reasonable default for noisy
//! objectives. The initial simplex and shrink steps are evaluated as a
//! batch so they can run concurrently.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::bounds::Bounds;
use crate::objective::{Interrupt, IterationStep, Objective};
use crate::optimizer::{Optimizer, OptimizerSupport, SupportLevel, Termination, Tracked, distance};
use crate::result::{OptimizerResult, OptimizerStatus};

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Nelder-Mead simplex optimizer.
///
/// Converges when both the spread of values across the simplex and its
/// diameter fall below the tolerance.
#[derive(Debug, Clone)]
pub struct NelderMead {
    /// Edge length of the initial simplex.
    pub initial_step: f64,
    /// Stopping rules.
    pub termination: Termination,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            initial_step: 0.5,
            termination: Termination::default(),
        }
    }
}

impl NelderMead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_step(mut self, step: f64) -> Self {
        self.initial_step = step;
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

    fn initial_simplex(&self, tracked: &Tracked<'_>, x: &[f64]) -> Vec<Vec<f64>> {
        let mut simplex = vec![x.to_vec()];
        for i in 0..x.len() {
            let mut vertex = x.to_vec();
            vertex[i] += self.initial_step;
            let mut vertex = tracked.clip(&vertex);
            // Step the other way when the upper bound swallowed the offset.
            if vertex[i] == x[i] {
                vertex[i] -= self.initial_step;
                vertex = tracked.clip(&vertex);
            }
            simplex.push(vertex);
        }
        simplex
    }

    /// One simplex update. Returns after the simplex has been modified.
    async fn step(
        &self,
        tracked: &mut Tracked<'_>,
        simplex: &mut [Vec<f64>],
        costs: &mut [f64],
    ) -> Result<(), Interrupt> {
        let n = simplex.len() - 1;
        let order = ranked(costs);
        let best = order[0];
        let second_worst = order[n - 1];
        let worst = order[n];

        let mut centroid = vec![0.0; n];
        for &idx in &order[..n] {
            for (c, v) in centroid.iter_mut().zip(&simplex[idx]) {
                *c += v / n as f64;
            }
        }
        let along = |t: f64, from: &[f64]| -> Vec<f64> {
            centroid
                .iter()
                .zip(from)
                .map(|(c, w)| c + t * (c - w))
                .collect()
        };

        let reflected = tracked.clip(&along(REFLECTION, &simplex[worst]));
        let f_reflected = tracked.value(&reflected).await?;

        if f_reflected < costs[best] {
            let expanded = tracked.clip(&along(EXPANSION, &simplex[worst]));
            let f_expanded = tracked.value(&expanded).await?;
            if f_expanded < f_reflected {
                simplex[worst] = expanded;
                costs[worst] = f_expanded;
            } else {
                simplex[worst] = reflected;
                costs[worst] = f_reflected;
            }
            return Ok(());
        }

        if f_reflected < costs[second_worst] {
            simplex[worst] = reflected;
            costs[worst] = f_reflected;
            return Ok(());
        }

        // Outside contraction when the reflection beat the worst vertex.
        let (contracted, threshold) = if f_reflected < costs[worst] {
            (along(CONTRACTION, &simplex[worst]), f_reflected)
        } else {
            (along(-CONTRACTION, &simplex[worst]), costs[worst])
        };
        let contracted = tracked.clip(&contracted);
        let f_contracted = tracked.value(&contracted).await?;
        if f_contracted < threshold {
            simplex[worst] = contracted;
            costs[worst] = f_contracted;
            return Ok(());
        }

        let anchor = simplex[best].clone();
        let others: Vec<usize> = (0..=n).filter(|&i| i != best).collect();
        let shrunk: Vec<Vec<f64>> = others
            .iter()
            .map(|&i| {
                let v: Vec<f64> = anchor
                    .iter()
                    .zip(&simplex[i])
                    .map(|(a, p)| a + SHRINK * (p - a))
                    .collect();
                tracked.clip(&v)
            })
            .collect();
        let values = tracked.values(&shrunk).await?;
        for ((i, vertex), value) in others.into_iter().zip(shrunk).zip(values) {
            simplex[i] = vertex;
            costs[i] = value;
        }
        Ok(())
    }
}

/// Vertex indices sorted by cost, best first.
fn ranked(costs: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..costs.len()).collect();
    order.sort_by(|&a, &b| costs[a].total_cmp(&costs[b]));
    order
}

#[async_trait]
impl Optimizer for NelderMead {
    fn name(&self) -> &str {
        "nelder_mead"
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
            "initial_step": self.initial_step,
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
        if x0.is_empty() {
            return OptimizerResult::unevaluated(Vec::new(), OptimizerStatus::Failed)
                .with_message("nelder_mead needs at least one parameter");
        }

        let mut tracked = Tracked::new(objective, bounds, &self.termination);
        let start = tracked.clip(x0);

        let mut simplex = self.initial_simplex(&tracked, &start);
        let mut costs = match tracked.values(&simplex).await {
            Ok(costs) => costs,
            Err(interrupt) => {
                return OptimizerResult {
                    nfev: tracked.nfev,
                    ..OptimizerResult::unevaluated(start, interrupt.status())
                }
                .with_message(interrupt.to_string());
            }
        };

        let mut nit = 0;
        let stop = loop {
            if nit >= self.termination.max_iterations {
                break Err(OptimizerStatus::MaxIterations);
            }
            if let Err(interrupt) = self.step(&mut tracked, &mut simplex, &mut costs).await {
                break Ok(interrupt);
            }

            let order = ranked(&costs);
            let best = order[0];
            tracked.record(IterationStep {
                iteration: nit,
                point: &simplex[best],
                value: costs[best],
                gradient_norm: None,
            });
            nit += 1;

            let spread = costs[order[order.len() - 1]] - costs[best];
            let diameter = simplex
                .iter()
                .map(|v| distance(v, &simplex[best]))
                .fold(0.0, f64::max);
            debug!(iteration = nit, value = costs[best], spread, diameter, "simplex step");

            if spread < self.termination.tolerance && diameter < self.termination.tolerance {
                break Err(OptimizerStatus::Converged);
            }
        };

        let (status, message) = match stop {
            Err(status) => (status, None),
            Ok(interrupt) => (interrupt.status(), Some(interrupt.to_string())),
        };
        let best = ranked(&costs)[0];

        OptimizerResult {
            x: simplex[best].clone(),
            fun: Some(costs[best]),
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
    async fn test_empty_start_fails_without_evaluating() {
        let mut f = FnObjective::new(|_| 0.0);
        let result = NelderMead::new().minimize(&mut f, &[], None).await;

        assert_eq!(result.status, OptimizerStatus::Failed);
        assert!(result.message.is_some());
        assert_eq!(result.nfev, 0);
        assert_eq!(f.evaluations(), 0);
    }

    #[tokio::test]
    async fn test_finds_quadratic_minimum() {
        let nm = NelderMead::new().with_max_iterations(500).with_tolerance(1e-8);
        let mut f = FnObjective::new(|x| (x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2));
        let result = nm.minimize(&mut f, &[0.0, 0.0], None).await;

        assert_eq!(result.status, OptimizerStatus::Converged);
        assert!((result.x[0] - 1.0).abs() < 1e-3);
        assert!((result.x[1] + 2.0).abs() < 1e-3);
        assert_eq!(result.nfev, f.evaluations());
    }

    #[tokio::test]
    async fn test_records_one_step_per_iteration() {
        let nm = NelderMead::new().with_max_iterations(5).with_tolerance(0.0);
        let mut f = FnObjective::new(|x| x[0].powi(2));
        let result = nm.minimize(&mut f, &[2.0], None).await;

        assert_eq!(result.status, OptimizerStatus::MaxIterations);
        assert_eq!(result.nit, 5);
        assert_eq!(f.history().len(), 5);
    }

    #[tokio::test]
    async fn test_initial_simplex_respects_upper_bound() {
        let bounds = Bounds::uniform(1, 0.0, 1.0).unwrap();
        let nm = NelderMead::new().with_max_iterations(200);
        let mut f = FnObjective::new(|x| {
            assert!((0.0..=1.0).contains(&x[0]));
            (x[0] - 0.25).powi(2)
        });
        let result = nm.minimize(&mut f, &[1.0], Some(&bounds)).await;

        assert!((result.x[0] - 0.25).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_budget_during_initial_simplex() {
        let nm = NelderMead::new().with_termination(Termination::new(10, 1e-6).with_max_evaluations(2));
        let mut f = FnObjective::new(|x| x.iter().sum());
        let result = nm.minimize(&mut f, &[0.0, 0.0], None).await;

        assert_eq!(result.status, OptimizerStatus::MaxEvaluations);
        assert_eq!(result.fun, None);
        assert_eq!(f.evaluations(), 0);
    }

    #[test]
    fn test_ranked_orders_by_cost() {
        assert_eq!(ranked(&[3.0, 1.0, 2.0]), vec![1, 2, 0]);
    }
}
