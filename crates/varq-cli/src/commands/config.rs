//! Config command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use varq_core::RunConfig;

/// Print the effective run configuration as YAML.
pub fn execute(config_file: Option<&str>) -> Result<()> {
    let config = RunConfig::load(config_file.map(Path::new))
        .with_context(|| format!("failed to load configuration {config_file:?}"))?;
    print!("{}", config.to_yaml()?);
    Ok(())
}
