//! Objective evaluation through evaluation jobs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use varq_hal::{EvaluationKind, EvaluationRequest, Payload, ProblemDescriptor};

use crate::error::{AlgorithmError, AlgorithmResult};
use crate::pool::JobPool;

/// Objective value together with its statistical uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub value: f64,
    /// Variance of `value`, for sampled estimates.
    pub variance: Option<f64>,
    /// Shots behind the estimate.
    pub shots: Option<u32>,
}

impl Estimate {
    fn from_payload(payload: &Payload) -> Self {
        Self {
            value: payload.total(),
            variance: payload.total_variance(),
            shots: payload.shots,
        }
    }
}

/// Maps parameter vectors to objective values.
///
/// A vector payload (one value per observable term) is reduced by
/// summation. Failures are returned to the caller unchanged; the driver
/// decides what to do with them.
#[async_trait]
pub trait ObjectiveEvaluator: Send + Sync {
    /// Problem being evaluated.
    fn descriptor(&self) -> &ProblemDescriptor;

    /// Scalar objective value.
    async fn evaluate(&self, parameters: &[f64]) -> AlgorithmResult<f64> {
        Ok(self.evaluate_with_variance(parameters).await?.value)
    }

    /// Raw payload values, one per observable term.
    async fn evaluate_vector(&self, parameters: &[f64]) -> AlgorithmResult<Vec<f64>>;

    /// Scalar values for several points, evaluated concurrently and
    /// returned in input order.
    async fn evaluate_batch(&self, points: &[Vec<f64>]) -> AlgorithmResult<Vec<f64>>;

    /// Scalar value with variance and shot count.
    async fn evaluate_with_variance(&self, parameters: &[f64]) -> AlgorithmResult<Estimate>;

    /// Evaluation jobs submitted so far.
    fn evaluations(&self) -> usize;
}

/// [`ObjectiveEvaluator`] that dispatches every evaluation as a job.
pub struct JobEvaluator {
    pool: Arc<JobPool>,
    descriptor: Arc<ProblemDescriptor>,
}

impl JobEvaluator {
    pub fn new(pool: Arc<JobPool>, descriptor: Arc<ProblemDescriptor>) -> Self {
        Self { pool, descriptor }
    }

    /// The pool jobs go through.
    pub fn pool(&self) -> &Arc<JobPool> {
        &self.pool
    }

    async fn single(&self, parameters: &[f64]) -> AlgorithmResult<Payload> {
        let request = EvaluationRequest::value(self.descriptor.clone(), parameters.to_vec());
        self.pool
            .fan_out(vec![request])
            .await?
            .pop()
            .ok_or_else(|| AlgorithmError::Execution("evaluation returned no payload".into()))
            .and_then(non_empty)
    }
}

/// Reject payloads without values; their sum would silently read as zero.
fn non_empty(payload: Payload) -> AlgorithmResult<Payload> {
    if payload.values.is_empty() {
        return Err(AlgorithmError::Execution(
            "evaluation returned an empty payload".into(),
        ));
    }
    Ok(payload)
}

/// Objective value of a payload, the sum of its terms.
pub(crate) fn objective_value(payload: Payload) -> AlgorithmResult<f64> {
    non_empty(payload).map(|p| p.total())
}

#[async_trait]
impl ObjectiveEvaluator for JobEvaluator {
    fn descriptor(&self) -> &ProblemDescriptor {
        &self.descriptor
    }

    async fn evaluate_vector(&self, parameters: &[f64]) -> AlgorithmResult<Vec<f64>> {
        Ok(self.single(parameters).await?.values)
    }

    async fn evaluate_batch(&self, points: &[Vec<f64>]) -> AlgorithmResult<Vec<f64>> {
        let requests = points
            .iter()
            .enumerate()
            .map(|(index, point)| {
                EvaluationRequest::new(
                    self.descriptor.clone(),
                    point.clone(),
                    EvaluationKind::BatchElement { index },
                )
            })
            .collect();
        let payloads = self.pool.fan_out(requests).await?;
        payloads.into_iter().map(objective_value).collect()
    }

    async fn evaluate_with_variance(&self, parameters: &[f64]) -> AlgorithmResult<Estimate> {
        let payload = self.single(parameters).await?;
        Ok(Estimate::from_payload(&payload))
    }

    fn evaluations(&self) -> usize {
        self.pool.evaluations()
    }
}
