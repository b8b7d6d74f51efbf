// src/repository/reconcile.rs

//! Set reconciliation between local and remote image inventories
//!
//! A pure, synchronous computation over already-materialized data: given
//! the remote manifest, the set of images known anywhere in the local
//! store, and the set associated with this particular repository, decide
//! what to fetch, what to merely associate, and what to prune.
//!
//! Download is keyed strictly on global store presence, not per-repository
//! association: an image that exists in the store but is not yet linked to
//! the repo is associated, never re-downloaded.

use crate::image::ImageRecord;
use crate::manifest::ImageManifest;
use crate::store::StoredUnit;
use std::collections::HashSet;

/// The outcome of one reconciliation: three disjoint sets
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Remote images absent from the local store entirely
    pub to_fetch: Vec<ImageRecord>,
    /// Remote images present in the store but not associated with this
    /// repository
    pub to_associate: Vec<ImageRecord>,
    /// Associated images no longer advertised remotely (empty unless
    /// prune mode is enabled)
    pub to_prune: Vec<StoredUnit>,
}

/// Compute the reconciliation for one sync
///
/// Deterministic and idempotent: identical inputs yield identical sets,
/// and `to_fetch`/`to_associate` preserve manifest order. Duplicate
/// manifest entries with the same checksum are considered once.
pub fn reconcile(
    manifest: &ImageManifest,
    store_units: &[StoredUnit],
    associated_units: &[StoredUnit],
    remove_missing: bool,
) -> Reconciliation {
    let store_keys: HashSet<&str> = store_units.iter().map(|u| u.key.as_str()).collect();
    let associated_keys: HashSet<&str> =
        associated_units.iter().map(|u| u.key.as_str()).collect();
    let remote_keys: HashSet<&str> = manifest.iter().map(|i| i.checksum()).collect();

    let mut seen = HashSet::new();
    let mut to_fetch = Vec::new();
    let mut to_associate = Vec::new();
    for image in manifest {
        if !seen.insert(image.checksum()) {
            continue;
        }
        if !store_keys.contains(image.checksum()) {
            to_fetch.push(image.clone());
        } else if !associated_keys.contains(image.checksum()) {
            to_associate.push(image.clone());
        }
    }

    let to_prune = if remove_missing {
        associated_units
            .iter()
            .filter(|unit| !remote_keys.contains(unit.key.as_str()))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    Reconciliation {
        to_fetch,
        to_associate,
        to_prune,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{attrs, Metadata};
    use std::path::PathBuf;

    fn manifest_with(checksums: &[&str]) -> ImageManifest {
        let fragments: Vec<Metadata> = checksums
            .iter()
            .map(|checksum| {
                let mut metadata = Metadata::new();
                metadata.insert(attrs::CHECKSUM, *checksum);
                metadata.insert(attrs::CONTAINER_FORMAT, "bare");
                metadata.insert(attrs::DISK_FORMAT, "qcow2");
                metadata.insert(attrs::FILENAME, format!("{checksum}.img"));
                metadata.insert(attrs::MIN_DISK, "0");
                metadata.insert(attrs::MIN_RAM, "0");
                metadata.insert(attrs::NAME, *checksum);
                metadata.insert(attrs::SIZE, "10");
                metadata
            })
            .collect();
        let bytes = ImageManifest::serialize(&fragments).unwrap();
        ImageManifest::parse(&bytes).unwrap()
    }

    fn unit(checksum: &str) -> StoredUnit {
        StoredUnit {
            key: checksum.to_string(),
            metadata: Metadata::new(),
            storage_path: PathBuf::from(format!("/store/{checksum}/{checksum}.img")),
        }
    }

    fn keys(records: &[ImageRecord]) -> Vec<&str> {
        records.iter().map(|r| r.checksum()).collect()
    }

    #[test]
    fn test_empty_manifest_yields_nothing() {
        let manifest = manifest_with(&[]);
        let store = vec![unit("aaa"), unit("bbb")];
        let associated = vec![unit("aaa")];

        let recon = reconcile(&manifest, &store, &associated, false);
        assert!(recon.to_fetch.is_empty());
        assert!(recon.to_associate.is_empty());
        assert!(recon.to_prune.is_empty());
    }

    #[test]
    fn test_missing_images_are_fetched_in_manifest_order() {
        let manifest = manifest_with(&["ccc", "aaa", "bbb"]);
        let recon = reconcile(&manifest, &[], &[], false);
        assert_eq!(keys(&recon.to_fetch), vec!["ccc", "aaa", "bbb"]);
        assert!(recon.to_associate.is_empty());
    }

    #[test]
    fn test_stored_but_unassociated_images_are_associated_not_fetched() {
        let manifest = manifest_with(&["aaa", "bbb"]);
        let store = vec![unit("aaa")];

        let recon = reconcile(&manifest, &store, &[], false);
        assert_eq!(keys(&recon.to_fetch), vec!["bbb"]);
        assert_eq!(keys(&recon.to_associate), vec!["aaa"]);
    }

    #[test]
    fn test_sets_are_disjoint_and_cover_remote() {
        let manifest = manifest_with(&["aaa", "bbb", "ccc", "ddd"]);
        let store = vec![unit("bbb"), unit("ccc")];
        let associated = vec![unit("ccc")];

        let recon = reconcile(&manifest, &store, &associated, false);
        let fetch: HashSet<&str> = keys(&recon.to_fetch).into_iter().collect();
        let associate: HashSet<&str> = keys(&recon.to_associate).into_iter().collect();

        assert!(fetch.is_disjoint(&associate));
        // Together they cover every remote key not already reconciled
        assert_eq!(fetch, HashSet::from(["aaa", "ddd"]));
        assert_eq!(associate, HashSet::from(["bbb"]));
    }

    #[test]
    fn test_prune_only_when_enabled() {
        let manifest = manifest_with(&["aaa"]);
        let store = vec![unit("aaa"), unit("zzz")];
        let associated = vec![unit("aaa"), unit("zzz")];

        let recon = reconcile(&manifest, &store, &associated, false);
        assert!(recon.to_prune.is_empty());

        let recon = reconcile(&manifest, &store, &associated, true);
        assert_eq!(recon.to_prune.len(), 1);
        assert_eq!(recon.to_prune[0].key, "zzz");
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let manifest = manifest_with(&["aaa", "bbb", "ccc"]);
        let store = vec![unit("bbb")];
        let associated = vec![unit("bbb")];

        let first = reconcile(&manifest, &store, &associated, true);
        let second = reconcile(&manifest, &store, &associated, true);

        assert_eq!(keys(&first.to_fetch), keys(&second.to_fetch));
        assert_eq!(keys(&first.to_associate), keys(&second.to_associate));
        assert_eq!(first.to_prune.len(), second.to_prune.len());
    }

    #[test]
    fn test_duplicate_manifest_entries_considered_once() {
        let manifest = manifest_with(&["aaa", "aaa", "bbb"]);
        let recon = reconcile(&manifest, &[], &[], false);
        assert_eq!(keys(&recon.to_fetch), vec!["aaa", "bbb"]);
    }
}
