//! Classical optimizers for variational algorithms.
//!
//! An [`Optimizer`] minimizes an [`Objective`]: an asynchronous function
//! from a parameter vector to a real value, optionally with a gradient.
//! The objective owns budgets and cancellation and signals them through
//! [`Interrupt`]; optimizers stop at the first interrupt and report the
//! best point seen.
//!
//! # Example
//!
//! ```ignore
//! use varq_opt::{FnObjective, GradientDescent, Optimizer};
//!
//! let optimizer = GradientDescent::new(0.1).with_max_iterations(200);
//! let mut objective = FnObjective::new(|x| (x[0] - 3.0).powi(2));
//! let result = optimizer.minimize(&mut objective, &[0.0], None).await;
//! assert!((result.x[0] - 3.0).abs() < 1e-3);
//! ```

pub mod bounds;
pub mod config;
pub mod error;
pub mod gradient_descent;
pub mod nelder_mead;
pub mod objective;
pub mod optimizer;
pub mod result;
pub mod spsa;

pub use bounds::{Bounds, project};
pub use config::OptimizerConfig;
pub use error::{OptError, OptResult};
pub use gradient_descent::GradientDescent;
pub use nelder_mead::NelderMead;
pub use objective::{FnObjective, Interrupt, IterationStep, Objective};
pub use optimizer::{Optimizer, OptimizerSupport, SupportLevel, Termination};
pub use result::{OptimizerResult, OptimizerStatus};
pub use spsa::Spsa;
