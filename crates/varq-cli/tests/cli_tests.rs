//! Behaviour the CLI relies on, exercised through the library crates.
//!
//! The CLI is a binary crate, so these tests drive the same calls the
//! `run` and `config` commands make.

use std::sync::Arc;

use varq_adapter_sim::AnalyticBackend;
use varq_core::{GradientStrategy, RunConfig, VariationalDriver};
use varq_hal::ProblemDescriptor;
use varq_opt::{OptimizerConfig, OptimizerStatus};

#[test]
fn test_default_config_yaml_loads_back() {
    let yaml = RunConfig::default().to_yaml().unwrap();
    assert!(yaml.contains("max_iterations: 100"));
    assert!(yaml.contains("kind: parameter_shift"));
    assert_eq!(RunConfig::from_yaml(&yaml).unwrap(), RunConfig::default());
}

#[test]
fn test_partial_config_uses_defaults() {
    let config = RunConfig::from_yaml("max_iterations: 7\n").unwrap();
    assert_eq!(config.max_iterations, 7);
    assert_eq!(config.gradient, GradientStrategy::parameter_shift());
    assert!(config.record_trace);
}

#[tokio::test]
async fn test_every_benchmark_runs() {
    for (name, x0) in [
        ("quadratic", vec![0.0, 0.0]),
        ("rosenbrock", vec![-1.0, 1.0]),
        ("sinusoid", vec![1.0]),
    ] {
        let config = RunConfig {
            max_iterations: 10,
            gradient: GradientStrategy::finite_difference(1e-3),
            optimizer: OptimizerConfig::GradientDescent {
                learning_rate: 1e-3,
                finite_diff_epsilon: 1e-4,
            },
            ..RunConfig::default()
        };
        let mut driver = VariationalDriver::new(
            Arc::new(AnalyticBackend::new().with_benchmarks()),
            ProblemDescriptor::new(name),
            x0,
            config,
        )
        .unwrap();

        let result = driver.run().await.unwrap();
        assert!(result.failure.is_none(), "{name}");
        assert_ne!(result.status, OptimizerStatus::Failed, "{name}");
        assert!(result.to_yaml().unwrap().contains(&format!("problem: {name}")));
    }
}
