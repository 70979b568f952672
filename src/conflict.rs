//! Conflict Detector
//!
//! Computes the minimal set of virtual paths genuinely requiring a merge,
//! in two phases. Hashing every file of every package is the dominant cost,
//! so phase 1 prunes by path-uniqueness without touching any hash: a path
//! claimed by exactly one package can never conflict, and a package whose
//! every path is unique needs no manifest at all. Phase 2 loads full
//! manifests for the surviving packages only and discards same-content
//! false positives.

use crate::config::EngineConfig;
use crate::error::StorageError;
use crate::manifest::ManifestStore;
use crate::store::ContentStore;
use crate::types::{ConflictSet, Contribution, NormalizedPath, PackageHandle};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Detect all real conflicts across the given active packages.
///
/// Contributor order within each conflict follows the order of `packages`
/// (host activation order).
pub fn detect_conflicts(
    packages: &[PackageHandle],
    manifests: &ManifestStore,
    store: &ContentStore,
    config: &EngineConfig,
) -> Result<ConflictSet, StorageError> {
    // Phase 1: existence-only scan.
    let mut claims: BTreeMap<NormalizedPath, Vec<usize>> = BTreeMap::new();
    for (index, package) in packages.iter().enumerate() {
        if !package.is_active {
            continue;
        }
        for path in quick_paths(package, manifests, store, config)? {
            claims.entry(path).or_default().push(index);
        }
    }

    let mut contested_paths: BTreeSet<NormalizedPath> = BTreeSet::new();
    let mut contested_packages: BTreeSet<usize> = BTreeSet::new();
    for (path, claimants) in &claims {
        if claimants.len() >= 2 {
            contested_paths.insert(path.clone());
            contested_packages.extend(claimants.iter().copied());
        }
    }
    debug!(
        candidate_paths = claims.len(),
        contested_paths = contested_paths.len(),
        contested_packages = contested_packages.len(),
        "quick scan complete"
    );
    if contested_paths.is_empty() {
        return Ok(ConflictSet::new());
    }

    // Phase 2: hash comparison over contested paths only.
    let mut contributions: BTreeMap<NormalizedPath, Vec<Contribution>> = BTreeMap::new();
    for index in &contested_packages {
        let package = &packages[*index];
        let manifest = manifests.load_or_rebuild(package, store, config)?;
        for entry in &manifest.entries {
            if !contested_paths.contains(&entry.path) {
                continue;
            }
            contributions
                .entry(entry.path.clone())
                .or_default()
                .push(Contribution {
                    package: package.name.clone(),
                    hash: entry.content_hash.clone(),
                });
        }
    }

    // Contributor order must follow `packages`, not the contested-set order.
    for contribs in contributions.values_mut() {
        contribs.sort_by_key(|c| {
            packages
                .iter()
                .position(|p| p.name == c.package)
                .unwrap_or(usize::MAX)
        });
    }

    let conflicts: ConflictSet = contributions
        .into_iter()
        .filter(|(_, contribs)| {
            contribs.len() >= 2 && contribs.iter().any(|c| c.hash != contribs[0].hash)
        })
        .collect();

    info!(conflicts = conflicts.len(), "conflict detection complete");
    Ok(conflicts)
}

/// Cheap candidate path list for phase 1: manifest paths when a usable
/// manifest exists, raw hash-free enumeration otherwise.
fn quick_paths(
    package: &PackageHandle,
    manifests: &ManifestStore,
    store: &ContentStore,
    config: &EngineConfig,
) -> Result<Vec<NormalizedPath>, StorageError> {
    if !manifests.is_stale(package, store) {
        let manifest = manifests.load_or_rebuild(package, store, config)?;
        return Ok(manifest.entries.iter().map(|e| e.path.clone()).collect());
    }
    if let Some(declared) = &package.declared_hashes {
        return Ok(declared
            .iter()
            .map(|(raw, _)| store.normalize(raw))
            .filter(|p| {
                p.extension()
                    .map(|e| config.is_supported_extension(&e))
                    .unwrap_or(false)
            })
            .collect());
    }
    let metas = store.enumerate(package, |p| {
        p.extension()
            .map(|e| config.is_supported_extension(&e))
            .unwrap_or(false)
    })?;
    Ok(metas.into_iter().map(|m| m.path).collect())
}
