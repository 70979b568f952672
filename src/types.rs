//! Core data model: packages, manifests, conflicts, and resolution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Hex-encoded content hash (see [`crate::store::hash`]).
pub type Hash = String;

/// A virtual path in canonical form: forward slashes only, no repeated
/// slashes, always a leading slash. Construct via [`crate::store::normalize`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedPath(pub(crate) String);

impl NormalizedPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File extension (lowercased), without the dot.
    pub fn extension(&self) -> Option<String> {
        let name = self.0.rsplit('/').next()?;
        let (_, ext) = name.rsplit_once('.')?;
        if ext.is_empty() {
            None
        } else {
            Some(ext.to_ascii_lowercase())
        }
    }

    /// The path relative to some root, with the leading slash stripped.
    pub fn relative(&self) -> &str {
        self.0.trim_start_matches('/')
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Physical storage backend of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageKind {
    /// Package contents live inside a tar archive.
    Archive { archive_path: PathBuf },
    /// Package contents live under an unpacked directory root.
    Directory { root: PathBuf },
}

/// Opaque reference to one content package, owned by the host package
/// manager. The engine borrows handles for the duration of a scan or merge.
#[derive(Debug, Clone)]
pub struct PackageHandle {
    /// Unique package name.
    pub name: String,
    /// Physical storage backend.
    pub storage: StorageKind,
    /// Whether the package is currently active.
    pub is_active: bool,
    /// Host-precomputed (path, hash) list, when available. Paths need not be
    /// normalized; the engine normalizes on ingest.
    pub declared_hashes: Option<Vec<(String, Hash)>>,
}

/// One file inventory entry in a package manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: NormalizedPath,
    pub content_hash: Hash,
}

/// Per-package inventory of mergeable files, persisted one JSON file per
/// sanitized package name.
///
/// A manifest is stale iff the package's newest file modification time
/// exceeds `latest_source_mod_time`; staleness forces a full rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest format version; mismatches are treated as stale.
    pub version: String,
    pub scanned_at: DateTime<Utc>,
    /// Newest source modification time observed at scan, as seconds since
    /// the Unix epoch.
    pub latest_source_mod_time: i64,
    pub entries: Vec<ManifestEntry>,
}

/// One package's contribution to a conflicting path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Contribution {
    pub package: String,
    pub hash: Hash,
}

/// Paths contributed by ≥2 packages with ≥2 distinct content hashes,
/// in contributor order (host activation order).
pub type ConflictSet = BTreeMap<NormalizedPath, Vec<Contribution>>;

/// Persisted record of one resolved conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub path: NormalizedPath,
    pub output_path: PathBuf,
    pub source_mods: Vec<String>,
    pub source_hashes: Vec<Hash>,
    pub output_hash: Hash,
    pub merged_at: DateTime<Utc>,
}

impl ResolutionRecord {
    /// Order-independent equality of the recorded (package, hash) pairs
    /// against a current conflict's contributions.
    pub fn matches(&self, contributions: &[Contribution]) -> bool {
        if self.source_mods.len() != contributions.len() {
            return false;
        }
        let mut recorded: Vec<(&str, &str)> = self
            .source_mods
            .iter()
            .zip(self.source_hashes.iter())
            .map(|(m, h)| (m.as_str(), h.as_str()))
            .collect();
        let mut current: Vec<(&str, &str)> = contributions
            .iter()
            .map(|c| (c.package.as_str(), c.hash.as_str()))
            .collect();
        recorded.sort_unstable();
        current.sort_unstable();
        recorded == current
    }
}

/// The persisted resolution index: one JSON document mapping each conflicting
/// path to its resolution record. A version mismatch invalidates the entire
/// index and wipes all prior merged output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionIndex {
    pub version: String,
    pub resolutions: BTreeMap<NormalizedPath, ResolutionRecord>,
}

impl ResolutionIndex {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            resolutions: BTreeMap::new(),
        }
    }
}

/// Terminal status of one conflicting path within a resolve run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    /// The merge engine produced fresh output this run.
    Resolved,
    /// A valid cached record existed; existing output reused.
    Skipped,
    /// No contributor could be read or parsed; prior output left in place.
    Failed,
}

/// Result of one `resolve()` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveSummary {
    pub resolved_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub total_conflicts: usize,
    /// True when the call was rejected by the debounce window (all counts zero).
    pub debounced: bool,
    /// True when an index version mismatch forced a full rebuild this run.
    pub version_changed: bool,
    pub per_path: BTreeMap<NormalizedPath, PathStatus>,
}

impl ResolveSummary {
    pub fn debounced() -> Self {
        Self {
            resolved_count: 0,
            skipped_count: 0,
            failed_count: 0,
            total_conflicts: 0,
            debounced: true,
            version_changed: false,
            per_path: BTreeMap::new(),
        }
    }
}

/// A change notification entry handed to the overlay host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: NormalizedPath,
    pub change: ChangeType,
}

/// What happened to an overlay file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Modified,
    Removed,
}
