//! Host collaborator interfaces.
//!
//! The engine does not own package management or overlay mounting; it talks
//! to the host through these traits. Package contents are reached through
//! [`crate::types::PackageHandle`]s the host hands out, and merged output is
//! surfaced by asking the host to mount the overlay root and broadcast
//! change notifications.

use crate::error::EngineError;
use crate::types::{FileChange, PackageHandle, ResolveSummary, StorageKind};
use std::path::Path;
use tracing::info;

/// Source of active packages. Returned order is host activation order and
/// fixes contributor order for every merge.
pub trait PackageProvider {
    fn list_active_packages(&self) -> Vec<PackageHandle>;
}

/// Overlay mount/notification surface of the host.
pub trait OverlayHost {
    fn mount(&self, overlay_root: &Path) -> Result<(), EngineError>;
    fn unmount(&self, overlay_root: &Path) -> Result<(), EngineError>;
    fn notify_files_changed(&self, changes: &[FileChange]) -> Result<(), EngineError>;
}

/// Subscriber to run completion events.
pub trait ResolutionListener {
    fn on_conflicts_resolved(&self, summary: &ResolveSummary);
}

/// Directory-scanning provider: every subdirectory of the root is a
/// directory-backed package, every `*.tar` file an archive-backed one.
/// Suitable for the CLI and tests; real hosts implement [`PackageProvider`]
/// themselves.
pub struct FsPackageProvider {
    root: std::path::PathBuf,
}

impl FsPackageProvider {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PackageProvider for FsPackageProvider {
    fn list_active_packages(&self) -> Vec<PackageHandle> {
        let Ok(read) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut entries: Vec<std::fs::DirEntry> = read.flatten().collect();
        entries.sort_by_key(|e| e.file_name());

        let mut packages = Vec::new();
        for entry in entries {
            let path = entry.path();
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            if path.is_dir() {
                packages.push(PackageHandle {
                    name,
                    storage: StorageKind::Directory { root: path },
                    is_active: true,
                    declared_hashes: None,
                });
            } else if path.extension().map(|e| e == "tar").unwrap_or(false) {
                packages.push(PackageHandle {
                    name,
                    storage: StorageKind::Archive { archive_path: path },
                    is_active: true,
                    declared_hashes: None,
                });
            }
        }
        packages
    }
}

/// Overlay host that only logs; for hosts without a real mount mechanism
/// (consumers read the overlay directory directly).
pub struct LoggingOverlayHost;

impl OverlayHost for LoggingOverlayHost {
    fn mount(&self, overlay_root: &Path) -> Result<(), EngineError> {
        info!(overlay = %overlay_root.display(), "overlay mount requested");
        Ok(())
    }

    fn unmount(&self, overlay_root: &Path) -> Result<(), EngineError> {
        info!(overlay = %overlay_root.display(), "overlay unmount requested");
        Ok(())
    }

    fn notify_files_changed(&self, changes: &[FileChange]) -> Result<(), EngineError> {
        info!(changed = changes.len(), "overlay change notification");
        Ok(())
    }
}
