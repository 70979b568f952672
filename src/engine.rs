//! Resolution Index & Orchestrator
//!
//! End-to-end run coordination: debounce, index load and version check,
//! conflict detection, stale-record pruning, merge dispatch, output writes,
//! index persistence, and overlay mount/notification. All engine state lives
//! in the [`Engine`] value — no module-level tables — so independent engines
//! can coexist (one per test, for instance).
//!
//! `resolve()` never fails for a single path: per-path problems become a
//! `Failed` status in the summary and the run continues. A failed merge
//! leaves any previous overlay output in place so consumers never regress to
//! "no file" because of a one-time failure; pruned paths (no longer
//! conflicting) do get their output removed.

use crate::config::EngineConfig;
use crate::conflict::detect_conflicts;
use crate::error::EngineError;
use crate::host::{OverlayHost, PackageProvider, ResolutionListener};
use crate::manifest::ManifestStore;
use crate::merge::{merge_path, MergeInput, MergeOutcome};
use crate::store::{compute_hash, ContentStore};
use crate::types::{
    ChangeType, ConflictSet, FileChange, NormalizedPath, PackageHandle, PathStatus,
    ResolutionIndex, ResolutionRecord, ResolveSummary,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Resolution index format version. Bumping this invalidates the entire
/// persisted index and wipes all prior merged output and in-memory caches on
/// the next run. Persisted manifests survive: they carry their own version
/// stamp ([`crate::manifest::MANIFEST_VERSION`]) and are validated against
/// source mtimes, so re-merging never re-hashes unchanged packages.
pub const INDEX_VERSION: &str = "3";

const INDEX_FILE: &str = "resolution_index.json";

/// The conflict resolution engine. Owns every cache layer and persisted
/// artifact root; borrows package handles from the host per run.
pub struct Engine {
    config: EngineConfig,
    store: ContentStore,
    manifests: ManifestStore,
    overlay: Box<dyn OverlayHost>,
    listeners: Vec<Box<dyn ResolutionListener>>,
    run_lock: Mutex<()>,
    last_run: Mutex<Option<Instant>>,
    index_version: String,
}

impl Engine {
    pub fn new(config: EngineConfig, overlay: Box<dyn OverlayHost>) -> Result<Self, EngineError> {
        fs::create_dir_all(&config.cache_root).map_err(|e| EngineError::CacheRootUnusable {
            path: config.cache_root.clone(),
            reason: e.to_string(),
        })?;
        fs::create_dir_all(&config.overlay_root).map_err(|e| {
            EngineError::OverlayRootUnusable {
                path: config.overlay_root.clone(),
                reason: e.to_string(),
            }
        })?;
        let manifests = ManifestStore::new(&config.cache_root)?;
        let store = ContentStore::new(&config);
        Ok(Self {
            config,
            store,
            manifests,
            overlay,
            listeners: Vec::new(),
            run_lock: Mutex::new(()),
            last_run: Mutex::new(None),
            index_version: INDEX_VERSION.to_string(),
        })
    }

    /// Override the index format version (embedders pinning compatibility).
    pub fn with_index_version(mut self, version: impl Into<String>) -> Self {
        self.index_version = version.into();
        self
    }

    /// Subscribe to run completion events.
    pub fn add_listener(&mut self, listener: Box<dyn ResolutionListener>) {
        self.listeners.push(listener);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Detection only: the current conflict set, without merging anything.
    pub fn detect(&self, provider: &dyn PackageProvider) -> Result<ConflictSet, EngineError> {
        let packages = provider.list_active_packages();
        Ok(detect_conflicts(&packages, &self.manifests, &self.store, &self.config)?)
    }

    /// Run one full resolution pass.
    ///
    /// Unless `force` is set, calls within the debounce window return a
    /// no-op summary with `debounced = true`.
    pub fn resolve(
        &self,
        provider: &dyn PackageProvider,
        force: bool,
    ) -> Result<ResolveSummary, EngineError> {
        // Index read-modify-write is one logical transaction per run.
        let _run = self.run_lock.lock();

        if !force {
            let last = *self.last_run.lock();
            if let Some(last) = last {
                if last.elapsed() < self.config.debounce() {
                    debug!("resolve debounced");
                    return Ok(ResolveSummary::debounced());
                }
            }
        }

        let (mut index, version_changed) = self.load_index();
        if version_changed {
            info!(
                current = %self.index_version,
                "index version changed, wiping merged output and caches"
            );
            self.wipe_overlay_output()?;
            self.store.clear();
            index = ResolutionIndex::new(self.index_version.clone());
        }

        let packages = provider.list_active_packages();
        let conflicts = detect_conflicts(&packages, &self.manifests, &self.store, &self.config)?;

        self.prune_stale_records(&mut index, &conflicts);

        let mut summary = ResolveSummary {
            resolved_count: 0,
            skipped_count: 0,
            failed_count: 0,
            total_conflicts: conflicts.len(),
            debounced: false,
            version_changed,
            per_path: BTreeMap::new(),
        };
        let mut changes: Vec<FileChange> = Vec::new();

        // Decide per path, then batch-read merge inputs package by package so
        // each backing archive is opened once for the whole run.
        let mut to_merge: Vec<&NormalizedPath> = Vec::new();
        for (path, contributions) in &conflicts {
            let reusable = !version_changed
                && index
                    .resolutions
                    .get(path)
                    .map(|record| record.matches(contributions) && record.output_path.exists())
                    .unwrap_or(false);
            if reusable {
                summary.skipped_count += 1;
                summary.per_path.insert(path.clone(), PathStatus::Skipped);
            } else {
                to_merge.push(path);
            }
        }

        let contents = self.batch_read_conflicts(&packages, &conflicts, &to_merge)?;

        for path in to_merge {
            let contributions = &conflicts[path];
            let mut inputs: Vec<MergeInput> = Vec::new();
            for contribution in contributions {
                match contents.get(&(contribution.package.clone(), path.clone())) {
                    Some(bytes) => inputs.push(MergeInput {
                        package: contribution.package.clone(),
                        hash: contribution.hash.clone(),
                        bytes: Arc::clone(bytes),
                    }),
                    None => {
                        warn!(path = %path, package = %contribution.package, "contributor unreadable, excluded");
                    }
                }
            }

            match merge_path(path, &inputs, &self.config, &self.store) {
                MergeOutcome::Merged(bytes) | MergeOutcome::CopiedIdentical(bytes) => {
                    let output_path = self.output_path(path);
                    match self.write_output(&output_path, &bytes) {
                        Ok(()) => {
                            let existed = index.resolutions.contains_key(path);
                            index.resolutions.insert(
                                path.clone(),
                                ResolutionRecord {
                                    path: path.clone(),
                                    output_path,
                                    source_mods: contributions
                                        .iter()
                                        .map(|c| c.package.clone())
                                        .collect(),
                                    source_hashes: contributions
                                        .iter()
                                        .map(|c| c.hash.clone())
                                        .collect(),
                                    output_hash: compute_hash(&bytes),
                                    merged_at: Utc::now(),
                                },
                            );
                            changes.push(FileChange {
                                path: path.clone(),
                                change: if existed {
                                    ChangeType::Modified
                                } else {
                                    ChangeType::Created
                                },
                            });
                            summary.resolved_count += 1;
                            summary.per_path.insert(path.clone(), PathStatus::Resolved);
                        }
                        Err(e) => {
                            warn!(path = %path, error = %e, "failed to write merged output");
                            index.resolutions.remove(path);
                            summary.failed_count += 1;
                            summary.per_path.insert(path.clone(), PathStatus::Failed);
                        }
                    }
                }
                MergeOutcome::Failed => {
                    warn!(path = %path, "merge failed, prior output (if any) left in place");
                    index.resolutions.remove(path);
                    summary.failed_count += 1;
                    summary.per_path.insert(path.clone(), PathStatus::Failed);
                }
            }
        }

        // Persisted unconditionally so the version stamp stays current even
        // for zero-conflict runs.
        self.persist_index(&index)?;
        *self.last_run.lock() = Some(Instant::now());

        if summary.resolved_count > 0 || summary.skipped_count > 0 {
            if let Err(e) = self.overlay.mount(&self.config.overlay_root) {
                warn!(error = %e, "overlay mount request failed");
            }
            if let Err(e) = self.overlay.notify_files_changed(&changes) {
                warn!(error = %e, "overlay change notification failed");
            }
            for listener in &self.listeners {
                listener.on_conflicts_resolved(&summary);
            }
        }

        info!(
            resolved = summary.resolved_count,
            skipped = summary.skipped_count,
            failed = summary.failed_count,
            total = summary.total_conflicts,
            "resolve run complete"
        );
        Ok(summary)
    }

    /// Activation/deactivation hook: purge the package's manifest and its
    /// path/content cache entries before the next resolve.
    pub fn invalidate_package(&self, package_name: &str) {
        self.manifests.invalidate(package_name);
        self.store.purge_package(package_name);
    }

    /// Wipe all derived state: in-memory caches, persisted manifests, the
    /// resolution index, and every merged output file.
    pub fn clear_caches(&self) -> Result<(), EngineError> {
        self.store.clear();
        self.manifests.clear()?;
        let index_path = self.index_path();
        if index_path.exists() {
            fs::remove_file(&index_path)?;
        }
        self.wipe_overlay_output()?;
        if let Err(e) = self.overlay.unmount(&self.config.overlay_root) {
            warn!(error = %e, "overlay unmount request failed");
        }
        Ok(())
    }

    fn index_path(&self) -> PathBuf {
        self.config.cache_root.join(INDEX_FILE)
    }

    fn output_path(&self, path: &NormalizedPath) -> PathBuf {
        self.config.overlay_root.join(path.relative())
    }

    /// Atomic output write: tmp sibling, then rename, so an interrupted
    /// write never truncates a previously merged file.
    fn write_output(&self, output_path: &PathBuf, bytes: &[u8]) -> Result<(), EngineError> {
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = output_path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, output_path)?;
        Ok(())
    }

    /// Load the persisted index; corrupt or missing means a fresh one.
    /// Returns (index, version_changed).
    fn load_index(&self) -> (ResolutionIndex, bool) {
        let path = self.index_path();
        let loaded = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<ResolutionIndex>(&raw).ok());
        match loaded {
            Some(index) if index.version == self.index_version => (index, false),
            Some(index) => {
                debug!(found = %index.version, expected = %self.index_version, "index version mismatch");
                (ResolutionIndex::new(self.index_version.clone()), true)
            }
            None => (ResolutionIndex::new(self.index_version.clone()), false),
        }
    }

    fn persist_index(&self, index: &ResolutionIndex) -> Result<(), EngineError> {
        let path = self.index_path();
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(index)
            .map_err(|e| EngineError::ConfigError(format!("Failed to serialize index: {}", e)))?;
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Remove index records for paths no longer conflicting, deleting their
    /// output files. This is the one case where output removal is correct:
    /// the path no longer needs an overlay at all.
    fn prune_stale_records(&self, index: &mut ResolutionIndex, conflicts: &ConflictSet) {
        let stale: Vec<NormalizedPath> = index
            .resolutions
            .keys()
            .filter(|p| !conflicts.contains_key(*p))
            .cloned()
            .collect();
        for path in stale {
            if let Some(record) = index.resolutions.remove(&path) {
                if record.output_path.exists() {
                    if let Err(e) = fs::remove_file(&record.output_path) {
                        warn!(path = %path, error = %e, "failed to delete pruned output");
                    }
                }
                debug!(path = %path, "pruned stale resolution record");
            }
        }
    }

    fn wipe_overlay_output(&self) -> Result<(), EngineError> {
        let root = &self.config.overlay_root;
        if root.exists() {
            fs::remove_dir_all(root)?;
        }
        fs::create_dir_all(root)?;
        Ok(())
    }

    /// Group the to-merge paths by contributing package and batch-read each
    /// package once.
    fn batch_read_conflicts(
        &self,
        packages: &[PackageHandle],
        conflicts: &ConflictSet,
        to_merge: &[&NormalizedPath],
    ) -> Result<BTreeMap<(String, NormalizedPath), Arc<Vec<u8>>>, EngineError> {
        let merge_set: BTreeSet<&NormalizedPath> = to_merge.iter().copied().collect();
        let mut per_package: BTreeMap<&str, Vec<NormalizedPath>> = BTreeMap::new();
        for (path, contributions) in conflicts {
            if !merge_set.contains(path) {
                continue;
            }
            for contribution in contributions {
                per_package
                    .entry(contribution.package.as_str())
                    .or_default()
                    .push(path.clone());
            }
        }

        let mut contents = BTreeMap::new();
        for (package_name, paths) in per_package {
            let Some(package) = packages.iter().find(|p| p.name == package_name) else {
                continue;
            };
            let read = self.store.batch_read(package, &paths)?;
            for (path, bytes) in read {
                contents.insert((package_name.to_string(), path), bytes);
            }
        }
        Ok(contents)
    }
}
