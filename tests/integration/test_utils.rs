//! Shared fixtures for integration tests

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use weft::config::EngineConfig;
use weft::engine::Engine;
use weft::host::{LoggingOverlayHost, PackageProvider};
use weft::types::{PackageHandle, StorageKind};

/// Provider over a fixed package list, in activation order.
pub struct VecProvider {
    pub packages: Vec<PackageHandle>,
}

impl PackageProvider for VecProvider {
    fn list_active_packages(&self) -> Vec<PackageHandle> {
        self.packages.clone()
    }
}

/// Build a directory-backed package with the given files.
pub fn dir_package(root: &Path, name: &str, files: &[(&str, &str)]) -> PackageHandle {
    let pkg_root = root.join(name);
    for (path, content) in files {
        let full = pkg_root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
    PackageHandle {
        name: name.to_string(),
        storage: StorageKind::Directory { root: pkg_root },
        is_active: true,
        declared_hashes: None,
    }
}

/// Build a tar-archive-backed package with the given files.
pub fn tar_package(root: &Path, name: &str, files: &[(&str, &str)]) -> PackageHandle {
    let archive_path = root.join(format!("{}.tar", name));
    let file = fs::File::create(&archive_path).unwrap();
    let mut builder = tar::Builder::new(file);
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    builder.finish().unwrap();
    PackageHandle {
        name: name.to_string(),
        storage: StorageKind::Archive { archive_path },
        is_active: true,
        declared_hashes: None,
    }
}

/// Engine with cache and overlay roots under the temp dir and no debounce.
pub fn test_engine(dir: &TempDir) -> Engine {
    Engine::new(test_config(dir), Box::new(LoggingOverlayHost)).unwrap()
}

pub fn test_config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.cache_root = dir.path().join("cache");
    config.overlay_root = dir.path().join("overlay");
    config.debounce_ms = 0;
    config
}

pub fn overlay_file(dir: &TempDir, rel: &str) -> PathBuf {
    dir.path().join("overlay").join(rel)
}
