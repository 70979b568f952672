//! Weft CLI Binary
//!
//! Command-line interface for the Weft conflict resolution engine.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use weft::cli::{Cli, RunContext};
use weft::config::EngineConfig;
use weft::logging::init_logging;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging config comes from the same file the engine reads; a broken
    // config still gets default logging so the error is visible.
    let logging_config = EngineConfig::load(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    init_logging(Some(&logging_config)).context("failed to initialize logging")?;

    let context = RunContext::new(&cli).context("failed to initialize engine")?;
    let output = context
        .execute(&cli.command)
        .context("command failed")?;

    info!("Command completed successfully");
    println!("{}", output);
    Ok(())
}
