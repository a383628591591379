//! CLI command implementations.

pub mod benchmarks;
pub mod config;
pub mod run;
pub mod version;
