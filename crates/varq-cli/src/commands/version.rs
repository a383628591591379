//! Version command implementation.

use console::style;

/// Execute the version command.
pub fn execute() {
    let version = env!("CARGO_PKG_VERSION");

    println!(
        "{} {} - hybrid variational optimization",
        style("varq").cyan().bold(),
        style(format!("v{version}")).yellow()
    );
    println!();
    println!("Components:");
    println!("  varq-hal          Evaluation jobs and backend contract");
    println!("  varq-opt          Classical optimizers");
    println!("  varq-core         Evaluator, gradients and driver");
    println!("  varq-adapter-sim  Analytic backend");
    println!("  varq-cli          Command-line interface");
}
