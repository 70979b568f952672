//! Logging System
//!
//! Structured logging via the `tracing` crate. Level and format come from the
//! engine config, overridable through the `WEFT_LOG` environment variable.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text (default: text)
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable colored output (text format only)
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stderr".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            color: default_true(),
        }
    }
}

/// Initialize the logging system
///
/// Priority order (highest to lowest): `WEFT_LOG` environment variable,
/// configuration file, defaults.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), EngineError> {
    let filter = build_env_filter(config)?;
    let base = Registry::default().with(filter);

    let format = config.map(|c| c.format.as_str()).unwrap_or("text");
    let to_stdout = config.map(|c| c.output == "stdout").unwrap_or(false);
    let use_color = config.map(|c| c.color).unwrap_or(true);

    if format == "json" {
        if to_stdout {
            base.with(fmt::layer().json().with_target(true).with_writer(std::io::stdout))
                .init();
        } else {
            base.with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .init();
        }
    } else if to_stdout {
        base.with(
            fmt::layer()
                .with_target(true)
                .with_ansi(use_color)
                .with_writer(std::io::stdout),
        )
        .init();
    } else {
        base.with(
            fmt::layer()
                .with_target(true)
                .with_ansi(use_color)
                .with_writer(std::io::stderr),
        )
        .init();
    }

    Ok(())
}

fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, EngineError> {
    if let Ok(env_directive) = std::env::var("WEFT_LOG") {
        return EnvFilter::try_new(env_directive)
            .map_err(|e| EngineError::ConfigError(format!("Invalid WEFT_LOG directive: {}", e)));
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    EnvFilter::try_new(level)
        .map_err(|e| EngineError::ConfigError(format!("Invalid log level '{}': {}", level, e)))
}
