//! varq Hardware Abstraction Layer
//!
//! This crate defines the unit of work of the variational core: an
//! evaluation of a parameterized problem at one parameter vector, executed
//! asynchronously by some backend that may be local or remote.
//!
//! # Overview
//!
//! - [`EvaluationRequest`] pairs a parameter vector with an opaque
//!   [`ProblemDescriptor`] and an [`EvaluationKind`].
//! - [`Backend`] is the execution boundary. Anything that can turn a
//!   request into a [`Payload`] implements it.
//! - [`Dispatcher`] submits requests and hands back [`EvaluationJob`]s, each
//!   an explicit `Pending → Running → {Done, Failed, Cancelled}` state
//!   machine with a non-blocking [`done`](EvaluationJob::done), an awaitable
//!   [`result`](EvaluationJob::result) with optional timeout, and an explicit
//!   [`cancel`](EvaluationJob::cancel).
//! - [`RetryPolicy`] bounds resubmission of transient failures.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use varq_hal::{Dispatcher, EvaluationRequest, ProblemDescriptor, RetryPolicy};
//! use varq_adapter_sim::AnalyticBackend;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = AnalyticBackend::new().with_function("parabola", |x| {
//!         vec![(x[0] - 3.0).powi(2)]
//!     });
//!     let dispatcher = Dispatcher::new(Arc::new(backend))
//!         .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(50)));
//!
//!     let problem = Arc::new(ProblemDescriptor::new("parabola"));
//!     let job = dispatcher.submit(EvaluationRequest::value(problem, vec![1.0]));
//!     let payload = job.result(Some(Duration::from_secs(5))).await?;
//!     println!("f(1.0) = {}", payload.total());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod payload;
pub mod request;

pub use backend::{Backend, BackendAvailability};
pub use dispatch::{Dispatcher, RetryPolicy};
pub use error::{HalError, HalResult};
pub use job::{EvaluationJob, Job, JobId, JobState, JobStatus};
pub use payload::Payload;
pub use request::{EvaluationKind, EvaluationRequest, ProblemDescriptor, RequestKey};
