//! varq Command-Line Interface
//!
//! Runs variational optimizations against the built-in analytic backend.
//!
//! ```text
//! varq run --objective quadratic --initial 0,0 --gradient parameter-shift
//! varq run --config run.yaml --objective sinusoid --initial 2.0,-2.5 --format yaml
//! varq config > run.yaml
//! ```

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{benchmarks, config, run, version};

/// varq - hybrid variational optimization over asynchronous evaluation jobs
#[derive(Parser)]
#[command(name = "varq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Minimize a benchmark objective
    Run(run::RunArgs),

    /// Print the default run configuration as YAML
    Config {
        /// Print the configuration after loading this file and VARQ_* variables
        #[arg(short, long)]
        config: Option<String>,
    },

    /// List the built-in benchmark objectives
    Benchmarks,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so results on stdout stay machine-readable.
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => run::execute(args).await,
        Commands::Config { config } => config::execute(config.as_deref()),
        Commands::Benchmarks => {
            benchmarks::execute();
            Ok(())
        }
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}
