//! Benchmarks for the variational loop
//!
//! Run with: cargo bench -p varq-core

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use varq_adapter_sim::AnalyticBackend;
use varq_core::{GradientStrategy, RunConfig, VariationalDriver};
use varq_hal::ProblemDescriptor;

/// Benchmark building parameter-shift plans
fn bench_gradient_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("gradient_plan");
    let strategy = GradientStrategy::parameter_shift();

    for n in &[2, 8, 32, 128] {
        let params = vec![0.1; *n];
        group.bench_with_input(BenchmarkId::new("parameter_shift", n), &params, |b, p| {
            b.iter(|| strategy.plan(black_box(p)));
        });
    }

    group.finish();
}

/// Benchmark complete runs against the analytic backend
fn bench_driver_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("driver_run");
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");

    for n in &[1, 4, 16] {
        group.bench_with_input(BenchmarkId::new("quadratic", n), n, |b, &n| {
            b.iter(|| {
                runtime.block_on(async {
                    let config = RunConfig {
                        max_iterations: 20,
                        gradient: GradientStrategy::finite_difference(1e-3),
                        record_trace: false,
                        ..RunConfig::default()
                    };
                    let mut driver = VariationalDriver::new(
                        Arc::new(AnalyticBackend::new().with_benchmarks()),
                        ProblemDescriptor::new("quadratic"),
                        vec![0.0; n],
                        config,
                    )
                    .expect("valid setup");
                    black_box(driver.run().await.expect("run"))
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_gradient_plan, bench_driver_run);

criterion_main!(benches);
