//! Engine Configuration
//!
//! Flat TOML-backed configuration for the conflict resolution engine: on-disk
//! roots, the mergeable-extension allow-list, cache bounds, and the resolve
//! debounce window. Every field has a default so a missing config file is not
//! an error.

use crate::error::EngineError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One scoring rule for the script merge heuristic: a marker substring and
/// the bonus weight awarded to a block containing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRule {
    pub marker: String,
    pub weight: i64,
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root for derived state: manifests and the resolution index.
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// Root for merged overlay output, mirroring conflicting paths.
    #[serde(default = "default_overlay_root")]
    pub overlay_root: PathBuf,

    /// Structured-document extensions considered for conflict detection.
    #[serde(default = "default_doc_extensions")]
    pub doc_extensions: Vec<String>,

    /// Script-file extensions considered for conflict detection.
    #[serde(default = "default_script_extensions")]
    pub script_extensions: Vec<String>,

    /// Maximum entries in the (package, path) content cache.
    #[serde(default = "default_max_path_cache_entries")]
    pub max_path_cache_entries: usize,

    /// Maximum open archive handles kept in the pool.
    #[serde(default = "default_max_archive_handles")]
    pub max_archive_handles: usize,

    /// Maximum entries in the parsed-document cache.
    #[serde(default = "default_max_parsed_docs")]
    pub max_parsed_docs: usize,

    /// Minimum interval between non-forced resolve runs, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Ordered primary feature markers for script block scoring.
    #[serde(default = "default_primary_markers")]
    pub primary_markers: Vec<MarkerRule>,

    /// Ordered secondary feature markers for script block scoring.
    #[serde(default = "default_secondary_markers")]
    pub secondary_markers: Vec<MarkerRule>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_cache_root() -> PathBuf {
    PathBuf::from(".weft/cache")
}

fn default_overlay_root() -> PathBuf {
    PathBuf::from(".weft/overlay")
}

fn default_doc_extensions() -> Vec<String> {
    vec!["json".to_string(), "jsonl".to_string(), "cfg".to_string()]
}

fn default_script_extensions() -> Vec<String> {
    vec!["lua".to_string()]
}

fn default_max_path_cache_entries() -> usize {
    4096
}

fn default_max_archive_handles() -> usize {
    16
}

fn default_max_parsed_docs() -> usize {
    512
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_primary_markers() -> Vec<MarkerRule> {
    vec![
        MarkerRule {
            marker: "callback(".to_string(),
            weight: 1000,
        },
        MarkerRule {
            marker: "addEventHandler".to_string(),
            weight: 1000,
        },
    ]
}

fn default_secondary_markers() -> Vec<MarkerRule> {
    vec![
        MarkerRule {
            marker: "config.".to_string(),
            weight: 100,
        },
        MarkerRule {
            marker: "settings[".to_string(),
            weight: 100,
        },
    ]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            overlay_root: default_overlay_root(),
            doc_extensions: default_doc_extensions(),
            script_extensions: default_script_extensions(),
            max_path_cache_entries: default_max_path_cache_entries(),
            max_archive_handles: default_max_archive_handles(),
            max_parsed_docs: default_max_parsed_docs(),
            debounce_ms: default_debounce_ms(),
            primary_markers: default_primary_markers(),
            secondary_markers: default_secondary_markers(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file. A missing file yields defaults;
    /// a present-but-invalid file is a configuration error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::ConfigError(format!("Failed to read config {:?}: {}", path, e))
        })?;
        toml::from_str(&raw).map_err(|e| {
            EngineError::ConfigError(format!("Failed to parse config {:?}: {}", path, e))
        })
    }

    /// Resolve the cache and overlay roots against a workspace root when they
    /// are relative.
    pub fn rooted_at(mut self, workspace_root: &Path) -> Self {
        if self.cache_root.is_relative() {
            self.cache_root = workspace_root.join(&self.cache_root);
        }
        if self.overlay_root.is_relative() {
            self.overlay_root = workspace_root.join(&self.overlay_root);
        }
        self
    }

    /// True if the extension (lowercase, no dot) is mergeable at all.
    pub fn is_supported_extension(&self, ext: &str) -> bool {
        self.doc_extensions.iter().any(|e| e == ext)
            || self.script_extensions.iter().any(|e| e == ext)
    }

    /// True if the extension names a line/block-oriented script file.
    pub fn is_script_extension(&self, ext: &str) -> bool {
        self.script_extensions.iter().any(|e| e == ext)
    }

    /// Debounce window between non-forced resolve runs.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
