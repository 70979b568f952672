//! Manifest Builder
//!
//! Produces and caches a per-package inventory of mergeable files with their
//! content hashes. Manifests persist one JSON file per sanitized package name
//! and are invalidated by modification-time comparison against the source
//! package. Hashing is memoized by (path, size, mtime) within a run so
//! rebuilds do not re-hash unchanged files.
//!
//! Failure semantics: a corrupt or unreadable persisted manifest is stale,
//! never an error surfaced to the caller.

use crate::config::EngineConfig;
use crate::error::StorageError;
use crate::store::{compute_hash, ContentStore};
use crate::types::{Hash, Manifest, ManifestEntry, NormalizedPath, PackageHandle};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Manifest format version; persisted manifests with any other stamp rebuild.
pub const MANIFEST_VERSION: &str = "2";

type HashMemoKey = (String, NormalizedPath, u64, i64);

/// Builds, persists, and caches per-package manifests.
pub struct ManifestStore {
    manifests_dir: PathBuf,
    in_memory: Mutex<HashMap<String, Arc<Manifest>>>,
    hash_memo: Mutex<HashMap<HashMemoKey, Hash>>,
}

impl ManifestStore {
    /// Create a manifest store rooted under the engine cache directory.
    pub fn new(cache_root: &Path) -> Result<Self, StorageError> {
        let manifests_dir = cache_root.join("manifests");
        fs::create_dir_all(&manifests_dir)?;
        Ok(Self {
            manifests_dir,
            in_memory: Mutex::new(HashMap::new()),
            hash_memo: Mutex::new(HashMap::new()),
        })
    }

    /// On-disk location of one package's manifest.
    pub fn manifest_path(&self, package_name: &str) -> PathBuf {
        self.manifests_dir
            .join(format!("{}.json", sanitize_name(package_name)))
    }

    /// True when no usable persisted manifest exists or the package source is
    /// newer than the manifest's recorded scan.
    pub fn is_stale(&self, package: &PackageHandle, store: &ContentStore) -> bool {
        match self.load_persisted(&package.name) {
            Some(manifest) => self.source_newer_than(package, store, &manifest),
            None => true,
        }
    }

    /// Return the package's manifest entries, from (in preference order) the
    /// in-memory cache, the persisted file, or a full rebuild.
    pub fn load_or_rebuild(
        &self,
        package: &PackageHandle,
        store: &ContentStore,
        config: &EngineConfig,
    ) -> Result<Arc<Manifest>, StorageError> {
        if let Some(cached) = self.in_memory.lock().get(&package.name).map(Arc::clone) {
            if !self.source_newer_than(package, store, &cached) {
                return Ok(cached);
            }
            debug!(package = %package.name, "in-memory manifest stale");
        }

        if let Some(persisted) = self.load_persisted(&package.name) {
            if !self.source_newer_than(package, store, &persisted) {
                let shared = Arc::new(persisted);
                self.in_memory
                    .lock()
                    .insert(package.name.clone(), Arc::clone(&shared));
                return Ok(shared);
            }
        }

        let rebuilt = Arc::new(self.build(package, store, config)?);
        self.in_memory
            .lock()
            .insert(package.name.clone(), Arc::clone(&rebuilt));
        Ok(rebuilt)
    }

    /// Full manifest rebuild: enumerate supported-extension files, hash each
    /// (memoized by path+size+mtime), persist the result.
    pub fn build(
        &self,
        package: &PackageHandle,
        store: &ContentStore,
        config: &EngineConfig,
    ) -> Result<Manifest, StorageError> {
        let entries = if let Some(declared) = &package.declared_hashes {
            // The host already hashed this package; trust its list.
            let mut entries: Vec<ManifestEntry> = declared
                .iter()
                .map(|(raw, hash)| ManifestEntry {
                    path: store.normalize(raw),
                    content_hash: hash.clone(),
                })
                .filter(|e| supported(&e.path, config))
                .collect();
            entries.sort_by(|a, b| a.path.cmp(&b.path));
            entries.dedup_by(|a, b| a.path == b.path);
            entries
        } else {
            self.hash_package_files(package, store, config)?
        };

        // An unreadable source still yields a manifest; stamped at 0 it is
        // permanently stale and rebuilds once the source is readable again.
        let latest_source_mod_time = match store.source_latest_mtime(package) {
            Ok(latest) => latest,
            Err(e) => {
                warn!(package = %package.name, error = %e, "source mtime check failed");
                0
            }
        };
        let manifest = Manifest {
            version: MANIFEST_VERSION.to_string(),
            scanned_at: Utc::now(),
            latest_source_mod_time,
            entries,
        };
        self.persist(&package.name, &manifest)?;
        info!(
            package = %package.name,
            entries = manifest.entries.len(),
            "manifest rebuilt"
        );
        Ok(manifest)
    }

    /// Drop the in-memory entry and delete the persisted file for a package.
    /// Activation/deactivation hook.
    pub fn invalidate(&self, package_name: &str) {
        self.in_memory.lock().remove(package_name);
        let path = self.manifest_path(package_name);
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!(package = package_name, error = %e, "failed to delete manifest");
            }
        }
        self.hash_memo
            .lock()
            .retain(|(pkg, _, _, _), _| pkg != package_name);
    }

    /// Drop every in-memory manifest and delete all persisted manifest files.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.in_memory.lock().clear();
        self.hash_memo.lock().clear();
        if self.manifests_dir.exists() {
            for entry in fs::read_dir(&self.manifests_dir)? {
                let entry = entry?;
                if entry.path().extension().map(|e| e == "json").unwrap_or(false) {
                    fs::remove_file(entry.path())?;
                }
            }
        }
        Ok(())
    }

    fn hash_package_files(
        &self,
        package: &PackageHandle,
        store: &ContentStore,
        config: &EngineConfig,
    ) -> Result<Vec<ManifestEntry>, StorageError> {
        let metas = store.enumerate(package, |p| supported(p, config))?;

        let mut entries = Vec::with_capacity(metas.len());
        let mut to_read = Vec::new();
        for meta in &metas {
            let key = (
                package.name.clone(),
                meta.path.clone(),
                meta.size,
                meta.mtime,
            );
            if let Some(hash) = self.hash_memo.lock().get(&key) {
                entries.push(ManifestEntry {
                    path: meta.path.clone(),
                    content_hash: hash.clone(),
                });
            } else {
                to_read.push(meta.clone());
            }
        }

        if !to_read.is_empty() {
            let paths: Vec<NormalizedPath> = to_read.iter().map(|m| m.path.clone()).collect();
            let contents = store.batch_read(package, &paths)?;
            for meta in to_read {
                // A path listed but unreadable just drops out of the manifest.
                let Some(bytes) = contents.get(&meta.path) else {
                    debug!(package = %package.name, path = %meta.path, "listed file unreadable, skipped");
                    continue;
                };
                let content_hash = compute_hash(bytes);
                self.hash_memo.lock().insert(
                    (package.name.clone(), meta.path.clone(), meta.size, meta.mtime),
                    content_hash.clone(),
                );
                entries.push(ManifestEntry {
                    path: meta.path,
                    content_hash,
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn source_newer_than(
        &self,
        package: &PackageHandle,
        store: &ContentStore,
        manifest: &Manifest,
    ) -> bool {
        match store.source_latest_mtime(package) {
            Ok(latest) => latest > manifest.latest_source_mod_time,
            Err(e) => {
                warn!(package = %package.name, error = %e, "mtime check failed, forcing rebuild");
                true
            }
        }
    }

    fn load_persisted(&self, package_name: &str) -> Option<Manifest> {
        let path = self.manifest_path(package_name);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Manifest>(&raw) {
            Ok(manifest) if manifest.version == MANIFEST_VERSION => Some(manifest),
            Ok(manifest) => {
                debug!(
                    package = package_name,
                    found = %manifest.version,
                    expected = MANIFEST_VERSION,
                    "manifest version mismatch, treating as stale"
                );
                None
            }
            Err(e) => {
                warn!(package = package_name, error = %e, "corrupt manifest, treating as stale");
                None
            }
        }
    }

    /// Atomic persist: write to `.tmp`, then rename.
    fn persist(&self, package_name: &str, manifest: &Manifest) -> Result<(), StorageError> {
        let path = self.manifest_path(package_name);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(manifest).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Failed to serialize manifest for {}: {}", package_name, e),
            ))
        })?;
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn supported(path: &NormalizedPath, config: &EngineConfig) -> bool {
    path.extension()
        .map(|e| config.is_supported_extension(&e))
        .unwrap_or(false)
}

/// Filesystem-safe package name: alphanumerics, `-`, `_`; everything else
/// becomes `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
