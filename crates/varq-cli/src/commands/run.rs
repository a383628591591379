//! Run command implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use console::style;
use tracing::warn;

use varq_adapter_sim::AnalyticBackend;
use varq_core::{GradientStrategy, RunConfig, VariationalDriver, VariationalResult};
use varq_hal::ProblemDescriptor;

/// Gradient rule selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GradientArg {
    ParameterShift,
    FiniteDifference,
    None,
}

impl GradientArg {
    fn strategy(self) -> GradientStrategy {
        match self {
            GradientArg::ParameterShift => GradientStrategy::parameter_shift(),
            GradientArg::FiniteDifference => GradientStrategy::finite_difference(1e-3),
            GradientArg::None => GradientStrategy::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Benchmark objective (see `varq benchmarks`)
    #[arg(short, long, default_value = "quadratic")]
    pub objective: String,

    /// Initial parameters, comma separated
    #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub initial: Vec<f64>,

    /// Run configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Gradient rule, overriding the configuration
    #[arg(short, long, value_enum)]
    pub gradient: Option<GradientArg>,

    /// Maximum optimizer iterations, overriding the configuration
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Maximum evaluation jobs, overriding the configuration
    #[arg(long)]
    pub max_evaluations: Option<usize>,

    /// Simulate shot noise with this many shots per evaluation
    #[arg(long)]
    pub shots: Option<u32>,

    /// Seed for simulated shot noise
    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Simulated latency of every evaluation job, in milliseconds
    #[arg(long)]
    pub latency_ms: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Write the result to this file instead of stdout
    #[arg(long)]
    pub output: Option<String>,
}

/// Execute the run command.
pub async fn execute(args: RunArgs) -> Result<()> {
    let config = effective_config(&args)?;

    let mut backend = AnalyticBackend::new().with_benchmarks();
    if let Some(shots) = args.shots {
        backend = backend.with_shot_noise(shots, args.seed);
    }
    if let Some(latency) = args.latency_ms {
        backend = backend.with_latency(Duration::from_millis(latency));
    }
    if !backend.problems().contains(&args.objective.as_str()) {
        anyhow::bail!(
            "Unknown objective: '{}'. Available: {}",
            args.objective,
            backend.problems().join(", ")
        );
    }

    eprintln!(
        "{} Minimizing {} from {:?} ({})",
        style("→").cyan().bold(),
        style(&args.objective).green(),
        args.initial,
        style(config.optimizer.name()).yellow()
    );

    let mut driver = VariationalDriver::new(
        Arc::new(backend),
        ProblemDescriptor::new(args.objective.as_str()),
        args.initial.clone(),
        config,
    )?;

    let cancel = driver.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let result = driver.run().await?;
    print_summary(&result);

    let rendered = match args.format {
        OutputFormat::Json => result.to_json()?,
        OutputFormat::Yaml => result.to_yaml()?,
    };
    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write result to {path}"))?;
            eprintln!("  Result written to {}", style(path).cyan());
        }
        None => println!("{rendered}"),
    }

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// File and environment configuration with command-line overrides applied.
fn effective_config(args: &RunArgs) -> Result<RunConfig> {
    let mut config = RunConfig::load(args.config.as_deref().map(Path::new))
        .context("failed to load run configuration")?;

    if let Some(gradient) = args.gradient {
        config.gradient = gradient.strategy();
    }
    if let Some(max) = args.max_iterations {
        config.max_iterations = max;
    }
    if let Some(max) = args.max_evaluations {
        config.max_evaluations = Some(max);
    }
    config.validate()?;
    Ok(config)
}

fn print_summary(result: &VariationalResult) {
    let marker = if result.is_success() {
        style("✓").green().bold()
    } else {
        style("✗").red().bold()
    };
    eprintln!(
        "{} {} after {} iterations, {} evaluation jobs ({:.3}s)",
        marker,
        style(result.status).bold(),
        result.nit,
        result.evaluations,
        result.elapsed_secs
    );
    if let Some(value) = result.value {
        eprintln!("  f(x) = {}", style(format!("{value:.8}")).cyan());
    }
    if let Some(failure) = &result.failure {
        eprintln!(
            "  {} at iteration {}: {}",
            style(format!("{:?}", failure.kind)).red(),
            failure.iteration,
            failure.message
        );
    }
}
