// src/store/local.rs

//! SQLite-backed implementation of the store traits
//!
//! Unit rows live in the database next to the blob tree: blobs are stored
//! under `<db dir>/content/<relative path>` and the unit row carries the
//! absolute blob path plus the JSON-serialized ordered metadata.

use crate::error::{Error, Result};
use crate::image::{attrs, Metadata};
use crate::store::models::{Association, ContentUnit};
use crate::store::{schema, AssociationStore, ContentStore, StoredUnit};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The crate's own content store: a SQLite database plus a blob directory
pub struct LocalStore {
    conn: Connection,
    root: PathBuf,
}

impl LocalStore {
    /// Open (creating if necessary) the store at the given database path
    pub fn open(db_path: &str) -> Result<Self> {
        let root = super::db_dir(db_path);
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::IoError(format!(
                "failed to create store directory {}: {e}",
                root.display()
            ))
        })?;

        let conn = Connection::open(db_path)?;
        schema::migrate(&conn)?;

        debug!("opened local store at {}", db_path);
        Ok(Self { conn, root })
    }

    /// Open an in-memory store rooted at the given directory (tests)
    pub fn open_in_memory(root: impl Into<PathBuf>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn,
            root: root.into(),
        })
    }

    /// Direct connection access, for the repository registry
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding content blobs
    pub fn content_dir(&self) -> PathBuf {
        self.root.join("content")
    }

    fn unit_from_row(row: ContentUnit) -> Result<StoredUnit> {
        let metadata: Metadata = serde_json::from_str(&row.metadata).map_err(|e| {
            Error::ParseError(format!(
                "corrupt metadata for unit {}: {e}",
                row.checksum
            ))
        })?;
        Ok(StoredUnit {
            key: row.checksum,
            metadata,
            storage_path: PathBuf::from(row.storage_path),
        })
    }
}

impl ContentStore for LocalStore {
    fn init_unit(
        &self,
        _type_id: &str,
        key: &str,
        _metadata: &Metadata,
        relative_path: &str,
    ) -> Result<PathBuf> {
        let storage_path = self.content_dir().join(relative_path);
        if let Some(parent) = storage_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!(
                    "failed to create content directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        debug!("allocated storage for unit {} at {}", key, storage_path.display());
        Ok(storage_path)
    }

    fn save_unit(
        &self,
        type_id: &str,
        key: &str,
        metadata: &Metadata,
        storage_path: &Path,
    ) -> Result<()> {
        let metadata_json = serde_json::to_string(metadata).map_err(|e| {
            Error::IoError(format!("failed to serialize metadata for unit {key}: {e}"))
        })?;
        let size = metadata
            .get(attrs::SIZE)
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);

        let mut unit = ContentUnit::new(
            type_id.to_string(),
            key.to_string(),
            metadata_json,
            storage_path.to_string_lossy().into_owned(),
            size,
        );
        unit.upsert(&self.conn)?;

        info!("saved unit {} ({} bytes)", key, size);
        Ok(())
    }

    fn units_by_type(&self, type_id: &str) -> Result<Vec<StoredUnit>> {
        ContentUnit::list_by_type(&self.conn, type_id)?
            .into_iter()
            .map(Self::unit_from_row)
            .collect()
    }
}

impl AssociationStore for LocalStore {
    fn associated_units(&self, repo_id: &str, type_id: &str) -> Result<Vec<StoredUnit>> {
        let checksums = Association::checksums_for_repo(&self.conn, repo_id)?;
        let mut units = Vec::with_capacity(checksums.len());
        for checksum in checksums {
            match ContentUnit::find_by_checksum(&self.conn, &checksum)? {
                Some(row) if row.type_id == type_id => units.push(Self::unit_from_row(row)?),
                Some(_) => {}
                None => {
                    return Err(Error::NotFoundError(format!(
                        "association for repository '{repo_id}' references missing unit {checksum}"
                    )));
                }
            }
        }
        Ok(units)
    }

    fn associate(&self, repo_id: &str, key: &str) -> Result<()> {
        if ContentUnit::find_by_checksum(&self.conn, key)?.is_none() {
            return Err(Error::NotFoundError(format!(
                "cannot associate unknown unit {key} with repository '{repo_id}'"
            )));
        }
        Association::insert(&self.conn, repo_id, key)?;
        debug!("associated unit {} with repository '{}'", key, repo_id);
        Ok(())
    }

    fn unassociate(&self, repo_id: &str, key: &str) -> Result<()> {
        Association::delete(&self.conn, repo_id, key)?;
        debug!("removed unit {} from repository '{}'", key, repo_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IMAGE_TYPE_ID;

    fn image_metadata(checksum: &str, filename: &str, size: u64) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(attrs::CHECKSUM, checksum);
        metadata.insert(attrs::FILENAME, filename);
        metadata.insert(attrs::SIZE, size.to_string());
        metadata
    }

    #[test]
    fn test_init_save_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open_in_memory(dir.path()).unwrap();

        let metadata = image_metadata("abc", "a.img", 3);
        let path = store
            .init_unit(IMAGE_TYPE_ID, "abc", &metadata, "abc/a.img")
            .unwrap();
        assert_eq!(path, store.content_dir().join("abc/a.img"));
        // Parent directory was created for the download to land in
        assert!(path.parent().unwrap().is_dir());

        // Nothing persisted until save
        assert!(store.units_by_type(IMAGE_TYPE_ID).unwrap().is_empty());

        store.save_unit(IMAGE_TYPE_ID, "abc", &metadata, &path).unwrap();
        let units = store.units_by_type(IMAGE_TYPE_ID).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].key, "abc");
        assert_eq!(units[0].metadata, metadata);
        assert_eq!(units[0].storage_path, path);
    }

    #[test]
    fn test_associate_requires_known_unit() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open_in_memory(dir.path()).unwrap();

        let err = store.associate("repo", "missing").unwrap_err();
        assert!(matches!(err, Error::NotFoundError(_)));
    }

    #[test]
    fn test_association_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open_in_memory(dir.path()).unwrap();

        let metadata = image_metadata("abc", "a.img", 3);
        let path = store
            .init_unit(IMAGE_TYPE_ID, "abc", &metadata, "abc/a.img")
            .unwrap();
        store.save_unit(IMAGE_TYPE_ID, "abc", &metadata, &path).unwrap();

        store.associate("repo", "abc").unwrap();
        // Idempotent
        store.associate("repo", "abc").unwrap();

        let units = store.associated_units("repo", IMAGE_TYPE_ID).unwrap();
        assert_eq!(units.len(), 1);

        store.unassociate("repo", "abc").unwrap();
        assert!(store.associated_units("repo", IMAGE_TYPE_ID).unwrap().is_empty());
        // The unit itself survives unassociation
        assert_eq!(store.units_by_type(IMAGE_TYPE_ID).unwrap().len(), 1);
    }
}
