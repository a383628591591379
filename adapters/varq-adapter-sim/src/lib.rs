//! varq Analytic Backend
//!
//! A local execution backend that evaluates closed-form objectives. It
//! behaves like a remote service from the point of view of the core:
//! submission returns a job id, jobs can be held running for a simulated
//! latency, fail on demand and be cancelled.
//!
//! # Features
//!
//! - **Exact evaluation** of registered functions, or seeded Gaussian shot
//!   noise with variance `1 / shots`
//! - **Deterministic**: identical requests always give identical payloads
//! - **Fault injection** through a failure predicate
//! - **Built-in benchmarks**: [`benchmarks::QUADRATIC`],
//!   [`benchmarks::ROSENBROCK`], [`benchmarks::SINUSOID`]
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use varq_adapter_sim::AnalyticBackend;
//! use varq_hal::{Backend, EvaluationRequest, ProblemDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = AnalyticBackend::new().with_benchmarks();
//!     let problem = Arc::new(ProblemDescriptor::new("quadratic"));
//!
//!     let job_id = backend.submit(&EvaluationRequest::value(problem, vec![1.0])).await?;
//!     let payload = backend.wait(&job_id, std::time::Duration::from_millis(10)).await?;
//!     println!("f(1.0) = {}", payload.total());
//!     Ok(())
//! }
//! ```

mod analytic;
pub mod benchmarks;

pub use analytic::{AnalyticBackend, ObjectiveFn};
