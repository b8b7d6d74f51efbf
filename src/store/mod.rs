// src/store/mod.rs

//! Local content store
//!
//! The store has two seams the sync engine depends on: [`ContentStore`]
//! allocates and persists content units, and [`AssociationStore`] tracks
//! which units belong to which repository. Both are traits so the sync
//! and publish layers receive them by injection rather than reaching a
//! process-wide registry; [`LocalStore`] is the crate's SQLite-backed
//! implementation of both.

pub mod local;
pub mod models;
pub mod schema;

pub use local::LocalStore;

use crate::error::Result;
use crate::image::Metadata;
use std::path::{Path, PathBuf};

/// Content type identifier for machine images
pub const IMAGE_TYPE_ID: &str = "machine_image";

/// A content unit as persisted in the local store
#[derive(Debug, Clone)]
pub struct StoredUnit {
    /// Identity key (image checksum)
    pub key: String,
    /// Metadata carried by the unit, in its original key order
    pub metadata: Metadata,
    /// Absolute path of the unit's content blob
    pub storage_path: PathBuf,
}

/// Allocates on-disk locations for content units and persists their
/// association records
pub trait ContentStore {
    /// Allocate a storage location for a unit
    ///
    /// `relative_path` is the unit's directory plus filename, relative to
    /// the store's content root. The location is returned without any
    /// database write; [`ContentStore::save_unit`] persists the unit.
    fn init_unit(
        &self,
        type_id: &str,
        key: &str,
        metadata: &Metadata,
        relative_path: &str,
    ) -> Result<PathBuf>;

    /// Persist a unit record for content that now exists at `storage_path`
    fn save_unit(
        &self,
        type_id: &str,
        key: &str,
        metadata: &Metadata,
        storage_path: &Path,
    ) -> Result<()>;

    /// All units of the given type known anywhere in the store
    fn units_by_type(&self, type_id: &str) -> Result<Vec<StoredUnit>>;
}

/// Tracks which units are associated with which repository
pub trait AssociationStore {
    /// Units associated with a repository, in association order
    fn associated_units(&self, repo_id: &str, type_id: &str) -> Result<Vec<StoredUnit>>;

    /// Associate an existing unit with a repository (idempotent)
    fn associate(&self, repo_id: &str, key: &str) -> Result<()>;

    /// Drop a repository's association to a unit
    ///
    /// The unit itself stays in the store; only the link is removed.
    fn unassociate(&self, repo_id: &str, key: &str) -> Result<()>;
}

/// Directory containing the database
pub fn db_dir(db_path: &str) -> PathBuf {
    Path::new(db_path)
        .parent()
        .unwrap_or(Path::new("/var/lib/mirage"))
        .to_path_buf()
}

/// Directory holding content blobs
pub fn content_dir(db_path: &str) -> PathBuf {
    db_dir(db_path).join("content")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_dir() {
        assert_eq!(
            db_dir("/var/lib/mirage/mirage.db"),
            PathBuf::from("/var/lib/mirage")
        );
    }

    #[test]
    fn test_content_dir() {
        assert_eq!(
            content_dir("/var/lib/mirage/mirage.db"),
            PathBuf::from("/var/lib/mirage/content")
        );
    }
}
