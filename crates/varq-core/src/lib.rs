//! varq Core - Hybrid Variational Optimization Loop
//!
//! This crate drives a classical optimizer over an objective whose every
//! evaluation is an asynchronous job on some execution backend.
//!
//! # Components
//!
//! - [`JobPool`]: fans requests out as concurrent jobs, de-duplicates
//!   them, enforces the job budget, watches cancellation and the
//!   wall-clock deadline.
//! - [`ObjectiveEvaluator`] / [`JobEvaluator`]: parameters to objective
//!   values, vectors, batches and estimates with variance.
//! - [`GradientSupplier`]: parameter-shift or finite-difference gradients
//!   built from [`GradientPlan`]s.
//! - [`VariationalDriver`]: validates the setup, runs the optimizer,
//!   records the trace and produces a [`VariationalResult`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use varq_adapter_sim::AnalyticBackend;
//! use varq_core::{GradientStrategy, RunConfig, VariationalDriver};
//! use varq_hal::ProblemDescriptor;
//!
//! let backend = AnalyticBackend::new().with_function("parabola", |x| {
//!     vec![(x[0] - 3.0).powi(2)]
//! });
//! let config = RunConfig {
//!     max_iterations: 200,
//!     gradient: GradientStrategy::finite_difference(1e-3),
//!     ..RunConfig::default()
//! };
//! let mut driver = VariationalDriver::new(
//!     Arc::new(backend),
//!     ProblemDescriptor::new("parabola"),
//!     vec![0.0],
//!     config,
//! )?;
//! let result = driver.run().await?;
//! println!("{}", result.to_json()?);
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod evaluator;
pub mod gradient;
pub mod pool;
pub mod result;

pub use config::{ConfigError, FailurePolicy, RunConfig};
pub use driver::{DriverState, VariationalDriver};
pub use error::{AlgorithmError, AlgorithmResult, Budget, ErrorKind};
pub use evaluator::{Estimate, JobEvaluator, ObjectiveEvaluator};
pub use gradient::{GradientPlan, GradientStrategy, GradientSupplier, PlannedTerm};
pub use pool::{CancelHandle, JobPool};
pub use result::{
    FailureReport, IterationRecord, OptimizerSummary, RunFailure, VariationalResult,
};
