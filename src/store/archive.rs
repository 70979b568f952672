//! Archive-backed package access.
//!
//! Packages stored as tar archives have no random access: every lookup is a
//! sequential pass over the entry stream. The engine amortizes this two ways:
//! a bounded pool of open file handles (reused across passes, evicted in
//! oldest-inserted halves when full), and batch reads that satisfy many paths
//! in a single pass.
//!
//! Entry names are normalized before comparison, so archives that store
//! entries with or without a leading slash (or with backslashes) all match
//! the same virtual path.

use crate::error::StorageError;
use crate::store::path::normalize;
use crate::types::NormalizedPath;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Metadata for one file entry inside an archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntryMeta {
    pub path: NormalizedPath,
    pub size: u64,
    pub mtime: i64,
}

/// Identity stamp of an archive file on disk: (mtime seconds, byte size).
/// A pooled handle whose stamp no longer matches points at a replaced
/// archive and must be reopened.
pub(crate) type ArchiveStamp = (i64, u64);

pub(crate) fn archive_stamp(archive_path: &Path) -> Result<ArchiveStamp, StorageError> {
    let metadata = std::fs::metadata(archive_path).map_err(|e| StorageError::ArchiveUnreadable {
        path: archive_path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok((mtime, metadata.len()))
}

/// Bounded pool of open archive handles.
///
/// A handle's reads must not interleave across callers; the pool lock is held
/// for the duration of each pass, which serializes access per archive (and
/// across archives — acceptable for the synchronous engine).
pub struct ArchivePool {
    max_handles: usize,
    handles: Mutex<Vec<(PathBuf, ArchiveStamp, File)>>,
}

impl ArchivePool {
    pub fn new(max_handles: usize) -> Self {
        Self {
            max_handles: max_handles.max(2),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// List all file entries in the archive (headers only, no content reads).
    pub fn list_entries(&self, archive_path: &Path) -> Result<Vec<ArchiveEntryMeta>, StorageError> {
        self.with_handle(archive_path, |file| {
            let mut archive = tar::Archive::new(file);
            let mut out = Vec::new();
            for entry in archive.entries()? {
                let entry = entry?;
                if !entry.header().entry_type().is_file() {
                    continue;
                }
                let raw = entry.path()?.to_string_lossy().to_string();
                out.push(ArchiveEntryMeta {
                    path: normalize(&raw),
                    size: entry.header().size().unwrap_or(0),
                    mtime: entry.header().mtime().unwrap_or(0) as i64,
                });
            }
            Ok(out)
        })
    }

    /// Read every wanted path in one pass over the archive.
    ///
    /// Paths absent from the archive are simply missing from the result map.
    pub fn read_matching(
        &self,
        archive_path: &Path,
        wanted: &BTreeSet<NormalizedPath>,
    ) -> Result<BTreeMap<NormalizedPath, Vec<u8>>, StorageError> {
        self.with_handle(archive_path, |file| {
            let mut archive = tar::Archive::new(file);
            let mut out = BTreeMap::new();
            for entry in archive.entries()? {
                let mut entry = entry?;
                if !entry.header().entry_type().is_file() {
                    continue;
                }
                let raw = entry.path()?.to_string_lossy().to_string();
                let normalized = normalize(&raw);
                if !wanted.contains(&normalized) {
                    continue;
                }
                let mut bytes = Vec::with_capacity(entry.header().size().unwrap_or(0) as usize);
                entry.read_to_end(&mut bytes)?;
                out.insert(normalized, bytes);
                if out.len() == wanted.len() {
                    break;
                }
            }
            Ok(out)
        })
    }

    /// Drop every pooled handle.
    pub fn clear(&self) {
        self.handles.lock().clear();
    }

    fn with_handle<R>(
        &self,
        archive_path: &Path,
        f: impl FnOnce(&mut File) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let stamp = archive_stamp(archive_path)?;
        let mut handles = self.handles.lock();

        // A stamp mismatch means the archive was replaced on disk; the open
        // handle still reads the old contents and must be dropped.
        if let Some(i) = handles
            .iter()
            .position(|(p, s, _)| p == archive_path && *s != stamp)
        {
            warn!(archive = %archive_path.display(), "archive replaced on disk, reopening");
            handles.remove(i);
        }

        let position = handles.iter().position(|(p, _, _)| p == archive_path);
        let index = match position {
            Some(i) => i,
            None => {
                if handles.len() >= self.max_handles {
                    // Evict the oldest-inserted half, closing their handles.
                    let keep_from = handles.len() / 2;
                    handles.drain(..keep_from);
                }
                let file = File::open(archive_path).map_err(|e| {
                    warn!(archive = %archive_path.display(), error = %e, "failed to open archive");
                    StorageError::ArchiveUnreadable {
                        path: archive_path.to_path_buf(),
                        reason: e.to_string(),
                    }
                })?;
                handles.push((archive_path.to_path_buf(), stamp, file));
                handles.len() - 1
            }
        };

        let file = &mut handles[index].2;
        file.seek(SeekFrom::Start(0))?;
        f(file)
    }
}
