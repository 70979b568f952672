//! Content Store
//!
//! Uniform byte-level and hash-level access to package-owned files regardless
//! of storage backend (tar archive or unpacked directory), with the engine's
//! process-local cache layers in front:
//!
//! - raw content keyed by content hash (content-addressed, unbounded per run)
//! - content hash keyed by (package, path), evicted oldest-access-first
//! - archive entry index keyed by archive path and disk stamp, evicted in halves
//! - parsed documents keyed by content hash, evicted in halves
//!
//! Hash-keyed caches are content-addressed and never invalidated; only the
//! path-keyed cache needs purging when a package changes state.

pub mod archive;
pub mod hash;
pub mod path;

pub use archive::{ArchiveEntryMeta, ArchivePool};

use archive::{archive_stamp, ArchiveStamp};
pub use hash::compute_hash;

use crate::config::EngineConfig;
use crate::error::StorageError;
use crate::types::{Hash, NormalizedPath, PackageHandle, StorageKind};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Bound on the archive entry-index cache.
const MAX_ARCHIVE_INDEXES: usize = 64;

/// Metadata for one enumerable package file.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub path: NormalizedPath,
    pub size: u64,
    pub mtime: i64,
}

#[derive(Debug, Clone)]
struct PathCacheEntry {
    hash: Hash,
    last_access: u64,
}

/// Byte- and hash-level access to package files, with all cache layers.
pub struct ContentStore {
    max_path_cache_entries: usize,
    max_parsed_docs: usize,
    access_clock: AtomicU64,
    path_memo: Mutex<HashMap<String, NormalizedPath>>,
    by_hash: Mutex<HashMap<Hash, Arc<Vec<u8>>>>,
    by_path: Mutex<HashMap<(String, NormalizedPath), PathCacheEntry>>,
    archive_index: Mutex<Vec<(std::path::PathBuf, ArchiveStamp, Arc<Vec<ArchiveEntryMeta>>)>>,
    parsed_docs: Mutex<(Vec<Hash>, HashMap<Hash, Arc<Value>>)>,
    pool: ArchivePool,
}

impl ContentStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_path_cache_entries: config.max_path_cache_entries.max(2),
            max_parsed_docs: config.max_parsed_docs.max(2),
            access_clock: AtomicU64::new(0),
            path_memo: Mutex::new(HashMap::new()),
            by_hash: Mutex::new(HashMap::new()),
            by_path: Mutex::new(HashMap::new()),
            archive_index: Mutex::new(Vec::new()),
            parsed_docs: Mutex::new((Vec::new(), HashMap::new())),
            pool: ArchivePool::new(config.max_archive_handles),
        }
    }

    /// Normalize a raw path string, memoized by raw input.
    pub fn normalize(&self, raw: &str) -> NormalizedPath {
        if let Some(hit) = self.path_memo.lock().get(raw) {
            return hit.clone();
        }
        let normalized = path::normalize(raw);
        self.path_memo
            .lock()
            .insert(raw.to_string(), normalized.clone());
        normalized
    }

    /// Read one file's bytes from a package.
    ///
    /// Returns `Ok(None)` for missing files — manifests can lag actual
    /// package contents transiently, and an unreadable archive counts as
    /// missing for every path inside it. Any other per-file read failure is
    /// logged and treated as missing too: one bad contributor never aborts
    /// a run.
    pub fn read_file(
        &self,
        package: &PackageHandle,
        path: &NormalizedPath,
        expected_hash: Option<&Hash>,
    ) -> Result<Option<Arc<Vec<u8>>>, StorageError> {
        if let Some(expected) = expected_hash {
            if let Some(bytes) = self.by_hash.lock().get(expected) {
                self.touch_path(package, path, expected);
                return Ok(Some(Arc::clone(bytes)));
            }
        }

        let bytes = match &package.storage {
            StorageKind::Directory { root } => {
                let full = root.join(path.relative());
                match std::fs::read(&full) {
                    Ok(b) => b,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => {
                        // Any other per-file failure (permissions, the path
                        // turned into a directory while a declared-hash list
                        // lagged) counts as missing, never a run abort.
                        warn!(package = %package.name, path = %path, error = %e, "contributor file unreadable, treated as missing");
                        return Ok(None);
                    }
                }
            }
            StorageKind::Archive { archive_path } => {
                let wanted: BTreeSet<NormalizedPath> = [path.clone()].into_iter().collect();
                match self.pool.read_matching(archive_path, &wanted) {
                    Ok(mut found) => match found.remove(path) {
                        Some(b) => b,
                        None => return Ok(None),
                    },
                    Err(StorageError::ArchiveUnreadable { .. }) => return Ok(None),
                    Err(e) => {
                        warn!(package = %package.name, path = %path, error = %e, "archive read failed, treated as missing");
                        return Ok(None);
                    }
                }
            }
        };

        let content_hash = match expected_hash {
            Some(h) => h.clone(),
            None => compute_hash(&bytes),
        };
        Ok(Some(self.insert(package, path, content_hash, bytes)))
    }

    /// Read many paths from one package, opening any backing archive once.
    ///
    /// Missing paths are absent from the result, not errors.
    pub fn batch_read(
        &self,
        package: &PackageHandle,
        paths: &[NormalizedPath],
    ) -> Result<BTreeMap<NormalizedPath, Arc<Vec<u8>>>, StorageError> {
        let mut out = BTreeMap::new();
        match &package.storage {
            StorageKind::Directory { .. } => {
                for path in paths {
                    if let Some(bytes) = self.read_file(package, path, None)? {
                        out.insert(path.clone(), bytes);
                    }
                }
            }
            StorageKind::Archive { archive_path } => {
                let wanted: BTreeSet<NormalizedPath> = paths.iter().cloned().collect();
                let found = match self.pool.read_matching(archive_path, &wanted) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(package = %package.name, error = %e, "archive batch read failed, contributors treated as missing");
                        return Ok(out);
                    }
                };
                for (path, bytes) in found {
                    let content_hash = compute_hash(&bytes);
                    let shared = self.insert(package, &path, content_hash, bytes);
                    out.insert(path, shared);
                }
            }
        }
        Ok(out)
    }

    /// Enumerate the package's files matching the extension filter, with size
    /// and mtime where the backend provides them.
    ///
    /// A missing directory root or unreadable archive yields an empty list
    /// (logged), never a hard failure.
    pub fn enumerate(
        &self,
        package: &PackageHandle,
        filter: impl Fn(&NormalizedPath) -> bool,
    ) -> Result<Vec<FileMeta>, StorageError> {
        match &package.storage {
            StorageKind::Directory { root } => {
                if !root.exists() {
                    warn!(package = %package.name, root = %root.display(), "package root missing");
                    return Ok(Vec::new());
                }
                let mut out = Vec::new();
                for entry in WalkDir::new(root).follow_links(false) {
                    // Unreadable entries drop out of the listing; the rest of
                    // the package still enumerates.
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(e) => {
                            warn!(package = %package.name, error = %e, "walk entry unreadable, skipped");
                            continue;
                        }
                    };
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let rel = entry
                        .path()
                        .strip_prefix(root)
                        .map_err(|e| StorageError::InvalidPath(e.to_string()))?;
                    let normalized = self.normalize(&rel.to_string_lossy());
                    if !filter(&normalized) {
                        continue;
                    }
                    let metadata = match entry.metadata() {
                        Ok(metadata) => metadata,
                        Err(e) => {
                            warn!(package = %package.name, path = %normalized, error = %e, "metadata unreadable, entry skipped");
                            continue;
                        }
                    };
                    out.push(FileMeta {
                        path: normalized,
                        size: metadata.len(),
                        mtime: system_time_secs(metadata.modified().ok()),
                    });
                }
                out.sort_by(|a, b| a.path.cmp(&b.path));
                Ok(out)
            }
            StorageKind::Archive { archive_path } => {
                let entries = match self.archive_entries(archive_path) {
                    Ok(e) => e,
                    Err(StorageError::ArchiveUnreadable { .. }) => return Ok(Vec::new()),
                    Err(e) => return Err(e),
                };
                let mut out: Vec<FileMeta> = entries
                    .iter()
                    .filter(|m| filter(&m.path))
                    .map(|m| FileMeta {
                        path: m.path.clone(),
                        size: m.size,
                        mtime: m.mtime,
                    })
                    .collect();
                out.sort_by(|a, b| a.path.cmp(&b.path));
                Ok(out)
            }
        }
    }

    /// Newest modification time of the package source, in epoch seconds.
    ///
    /// For directories, the newest file mtime; for archives, the archive
    /// file's own mtime.
    pub fn source_latest_mtime(&self, package: &PackageHandle) -> Result<i64, StorageError> {
        match &package.storage {
            StorageKind::Directory { root } => {
                let mut latest = 0i64;
                if !root.exists() {
                    return Ok(0);
                }
                for entry in WalkDir::new(root).follow_links(false) {
                    let Ok(entry) = entry else { continue };
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    if let Ok(metadata) = entry.metadata() {
                        latest = latest.max(system_time_secs(metadata.modified().ok()));
                    }
                }
                Ok(latest)
            }
            StorageKind::Archive { archive_path } => {
                let metadata = std::fs::metadata(archive_path)?;
                Ok(system_time_secs(metadata.modified().ok()))
            }
        }
    }

    /// Fetch a parsed document by content hash.
    pub fn get_parsed(&self, content_hash: &Hash) -> Option<Arc<Value>> {
        self.parsed_docs.lock().1.get(content_hash).map(Arc::clone)
    }

    /// Insert a parsed document, evicting the oldest-inserted half when full.
    pub fn put_parsed(&self, content_hash: Hash, value: Value) -> Arc<Value> {
        let shared = Arc::new(value);
        let mut guard = self.parsed_docs.lock();
        let (order, map) = &mut *guard;
        if map.len() >= self.max_parsed_docs {
            let keep_from = order.len() / 2;
            for evicted in order.drain(..keep_from) {
                map.remove(&evicted);
            }
        }
        if map.insert(content_hash.clone(), Arc::clone(&shared)).is_none() {
            order.push(content_hash);
        }
        shared
    }

    /// Drop every in-memory cache layer.
    pub fn clear(&self) {
        self.path_memo.lock().clear();
        self.by_hash.lock().clear();
        self.by_path.lock().clear();
        self.archive_index.lock().clear();
        {
            let mut guard = self.parsed_docs.lock();
            guard.0.clear();
            guard.1.clear();
        }
        self.pool.clear();
        debug!("content store caches cleared");
    }

    /// Purge (package, path) cache entries for one package. Called when a
    /// package activates or deactivates so stale entries never mask changed
    /// content. Hash-keyed caches are content-addressed and stay.
    pub fn purge_package(&self, package_name: &str) {
        self.by_path
            .lock()
            .retain(|(pkg, _), _| pkg != package_name);
    }

    /// Cached content hash for (package, path), if resident.
    pub fn cached_path_hash(&self, package_name: &str, path: &NormalizedPath) -> Option<Hash> {
        self.by_path
            .lock()
            .get(&(package_name.to_string(), path.clone()))
            .map(|e| e.hash.clone())
    }

    fn archive_entries(
        &self,
        archive_path: &Path,
    ) -> Result<Arc<Vec<ArchiveEntryMeta>>, StorageError> {
        // The index is stamped with the archive's (mtime, size); a replaced
        // archive misses the cache and re-lists.
        let stamp = archive_stamp(archive_path)?;
        {
            let mut index = self.archive_index.lock();
            if let Some(i) = index.iter().position(|(p, _, _)| p == archive_path) {
                if index[i].1 == stamp {
                    return Ok(Arc::clone(&index[i].2));
                }
                index.remove(i);
            }
        }
        let entries = Arc::new(self.pool.list_entries(archive_path)?);
        let mut index = self.archive_index.lock();
        if index.len() >= MAX_ARCHIVE_INDEXES {
            let keep_from = index.len() / 2;
            index.drain(..keep_from);
        }
        index.push((archive_path.to_path_buf(), stamp, Arc::clone(&entries)));
        Ok(entries)
    }

    fn insert(
        &self,
        package: &PackageHandle,
        path: &NormalizedPath,
        content_hash: Hash,
        bytes: Vec<u8>,
    ) -> Arc<Vec<u8>> {
        let shared = Arc::new(bytes);
        self.by_hash
            .lock()
            .entry(content_hash.clone())
            .or_insert_with(|| Arc::clone(&shared));
        self.touch_path(package, path, &content_hash);
        shared
    }

    fn touch_path(&self, package: &PackageHandle, path: &NormalizedPath, content_hash: &Hash) {
        let stamp = self.access_clock.fetch_add(1, Ordering::Relaxed);
        let mut by_path = self.by_path.lock();
        by_path.insert(
            (package.name.clone(), path.clone()),
            PathCacheEntry {
                hash: content_hash.clone(),
                last_access: stamp,
            },
        );
        if by_path.len() > self.max_path_cache_entries {
            let excess = by_path.len() - self.max_path_cache_entries;
            let mut stamps: Vec<((String, NormalizedPath), u64)> = by_path
                .iter()
                .map(|(k, v)| (k.clone(), v.last_access))
                .collect();
            stamps.sort_by_key(|(_, stamp)| *stamp);
            for (key, _) in stamps.into_iter().take(excess) {
                by_path.remove(&key);
            }
        }
    }
}

fn system_time_secs(time: Option<std::time::SystemTime>) -> i64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
