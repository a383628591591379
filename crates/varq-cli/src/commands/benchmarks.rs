//! Benchmarks command implementation.

use console::style;
use varq_adapter_sim::AnalyticBackend;

/// List the problems the analytic backend knows.
pub fn execute() {
    let backend = AnalyticBackend::new().with_benchmarks();
    println!("{} Built-in objectives:", style("→").cyan().bold());
    for name in backend.problems() {
        let about = match name {
            "quadratic" => "sum (x_i - 3)^2, minimum 0 at x_i = 3",
            "rosenbrock" => "Rosenbrock valley, minimum 0 at x_i = 1",
            "sinusoid" => "sum cos(x_i), minimum -n at x_i = pi",
            _ => "",
        };
        println!("  {:<12} {}", style(name).green(), style(about).dim());
    }
}
