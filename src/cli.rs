//! CLI domain: parse, route, and presentation only.
//! No domain orchestration beyond constructing the engine and dispatching.

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::host::{FsPackageProvider, LoggingOverlayHost};
use crate::types::ResolveSummary;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "weft", about = "Conflict detection and merge resolution for content packages")]
pub struct Cli {
    /// Path to the engine config file (TOML)
    #[arg(long, global = true, default_value = "weft.toml")]
    pub config: PathBuf,

    /// Directory containing the packages to scan
    #[arg(long, global = true, default_value = "packages")]
    pub packages: PathBuf,

    /// Emit machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Detect conflicts and produce merged overlay output
    Resolve {
        /// Ignore the debounce window
        #[arg(long)]
        force: bool,
    },
    /// Report current conflicts without resolving them
    Status,
    /// Wipe all derived state (manifests, index, overlay output)
    ClearCache,
}

/// Execution context: engine plus package provider, built once per run.
pub struct RunContext {
    engine: Engine,
    provider: FsPackageProvider,
    json: bool,
}

impl RunContext {
    pub fn new(cli: &Cli) -> Result<Self, EngineError> {
        let config = EngineConfig::load(&cli.config)?;
        let engine = Engine::new(config, Box::new(LoggingOverlayHost))?;
        Ok(Self {
            engine,
            provider: FsPackageProvider::new(&cli.packages),
            json: cli.json,
        })
    }

    pub fn execute(&self, command: &Commands) -> Result<String, EngineError> {
        match command {
            Commands::Resolve { force } => {
                let summary = self.engine.resolve(&self.provider, *force)?;
                if self.json {
                    Ok(serde_json::to_string_pretty(&summary)
                        .map_err(|e| EngineError::ConfigError(e.to_string()))?)
                } else {
                    Ok(format_summary(&summary))
                }
            }
            Commands::Status => {
                let conflicts = self.engine.detect(&self.provider)?;
                if self.json {
                    let paths: Vec<String> =
                        conflicts.keys().map(|p| p.to_string()).collect();
                    Ok(serde_json::to_string_pretty(&paths)
                        .map_err(|e| EngineError::ConfigError(e.to_string()))?)
                } else if conflicts.is_empty() {
                    Ok("No conflicts.".to_string())
                } else {
                    let mut out = format!("{} conflicting path(s):\n", conflicts.len());
                    for (path, contributions) in &conflicts {
                        let packages: Vec<&str> =
                            contributions.iter().map(|c| c.package.as_str()).collect();
                        out.push_str(&format!("  {}  [{}]\n", path, packages.join(", ")));
                    }
                    Ok(out)
                }
            }
            Commands::ClearCache => {
                self.engine.clear_caches()?;
                Ok("Caches cleared.".to_string())
            }
        }
    }
}

fn format_summary(summary: &ResolveSummary) -> String {
    if summary.debounced {
        return "Debounced (ran too recently); use --force to override.".to_string();
    }
    format!(
        "Conflicts: {}  resolved: {}  skipped: {}  failed: {}{}",
        summary.total_conflicts,
        summary.resolved_count,
        summary.skipped_count,
        summary.failed_count,
        if summary.version_changed {
            "  (index version changed, full rebuild)"
        } else {
            ""
        }
    )
}
