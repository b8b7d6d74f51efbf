// src/image.rs

//! Image records and their metadata
//!
//! An [`ImageRecord`] describes one machine image: its identity (MD5
//! checksum), its metadata as carried by the manifest, and, once paired
//! with the content store, its on-disk storage location. Identity is
//! checksum-only: two records with equal checksums are the same image no
//! matter how the rest of their metadata differs.

use crate::error::{Error, Result};
use crate::hash;
use crate::store::{ContentStore, StoredUnit, IMAGE_TYPE_ID};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Metadata keys every manifest entry is required to carry
///
/// Anything outside this set is vendor extension data and is passed
/// through verbatim.
pub mod attrs {
    pub const CHECKSUM: &str = "image_checksum";
    pub const CONTAINER_FORMAT: &str = "image_container_format";
    pub const DISK_FORMAT: &str = "image_disk_format";
    pub const FILENAME: &str = "image_filename";
    pub const MIN_DISK: &str = "image_min_disk";
    pub const MIN_RAM: &str = "image_min_ram";
    pub const NAME: &str = "image_name";
    pub const SIZE: &str = "image_size";
}

/// An ordered string-to-string mapping of image metadata
///
/// Key order is insertion order and is preserved through serialization,
/// which keeps manifest round-trips byte-stable. Values are stored
/// verbatim; integer-typed fields are stringified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key, keeping the key's original position on
    /// replacement
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut metadata = Metadata::new();
        for (k, v) in iter {
            metadata.insert(k, v);
        }
        metadata
    }
}

/// One machine image: identity, metadata, and (once registered) a
/// storage location
#[derive(Debug, Clone)]
pub struct ImageRecord {
    checksum: String,
    metadata: Metadata,
    storage_path: Option<PathBuf>,
}

impl PartialEq for ImageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.checksum == other.checksum
    }
}

impl Eq for ImageRecord {}

impl Hash for ImageRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.checksum.hash(state);
    }
}

impl ImageRecord {
    /// Construct a record from a parsed manifest entry
    pub fn from_manifest_entry(checksum: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            checksum: checksum.into(),
            metadata,
            storage_path: None,
        }
    }

    /// Reconstruct a record describing content already in the local store
    pub fn from_stored_unit(unit: &StoredUnit) -> Self {
        Self {
            checksum: unit.key.clone(),
            metadata: unit.metadata.clone(),
            storage_path: Some(unit.storage_path.clone()),
        }
    }

    /// The identity key of this image
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Image size in bytes, as declared by the metadata
    ///
    /// Manifest-derived records always carry a validated size; records
    /// rebuilt from incomplete metadata report zero.
    pub fn size(&self) -> u64 {
        self.metadata
            .get(attrs::SIZE)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// The image's base filename, if declared
    pub fn filename(&self) -> Option<&str> {
        self.metadata.get(attrs::FILENAME)
    }

    /// Human-readable display name, falling back to the checksum
    pub fn name(&self) -> &str {
        self.metadata.get(attrs::NAME).unwrap_or(&self.checksum)
    }

    /// Relative path of this image's directory in the content store
    ///
    /// Pure and total: any checksum maps to a non-empty path and no
    /// metadata is consulted, so path computation cannot fail even for
    /// records with incomplete properties.
    pub fn relative_path(&self) -> &str {
        &self.checksum
    }

    /// Storage location assigned by [`ImageRecord::register`]
    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    /// Ask the content store to allocate a storage location for this image
    ///
    /// The location is cached on the record for the rest of its life.
    /// Registering twice is a logic error and fails fast rather than
    /// silently overwriting the allocation.
    pub fn register(&mut self, store: &dyn ContentStore) -> Result<()> {
        if self.storage_path.is_some() {
            return Err(Error::InitError(format!(
                "image {} is already registered",
                self.checksum
            )));
        }

        let filename = self.filename().ok_or_else(|| {
            Error::InitError(format!(
                "image {} has no {} metadata",
                self.checksum,
                attrs::FILENAME
            ))
        })?;

        let relative_path = format!("{}/{}", self.relative_path(), filename);
        let storage_path =
            store.init_unit(IMAGE_TYPE_ID, &self.checksum, &self.metadata, &relative_path)?;
        self.storage_path = Some(storage_path);
        Ok(())
    }

    /// Persist this image through the content store
    ///
    /// Only valid after [`ImageRecord::register`] has produced a storage
    /// location.
    pub fn commit(&self, store: &dyn ContentStore) -> Result<()> {
        let storage_path = self.storage_path.as_deref().ok_or_else(|| {
            Error::InitError(format!(
                "image {} must be registered before commit",
                self.checksum
            ))
        })?;
        store.save_unit(IMAGE_TYPE_ID, &self.checksum, &self.metadata, storage_path)
    }

    /// Check the downloaded bytes against the declared checksum and size
    pub fn validate(&self) -> Result<()> {
        let storage_path = self.storage_path.as_deref().ok_or_else(|| {
            Error::InitError(format!(
                "image {} must be registered before validation",
                self.checksum
            ))
        })?;

        let actual_size = std::fs::metadata(storage_path)
            .map_err(|e| {
                Error::ValidationError(format!(
                    "cannot stat {}: {e}",
                    storage_path.display()
                ))
            })?
            .len();
        if actual_size != self.size() {
            return Err(Error::ValidationError(format!(
                "image {}: size mismatch, expected {} bytes, got {}",
                self.checksum,
                self.size(),
                actual_size
            )));
        }

        hash::verify_file_md5(storage_path, &self.checksum)
            .map_err(|e| Error::ValidationError(format!("image {}: {e}", self.checksum)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn cirros_metadata() -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(attrs::CHECKSUM, "64d7c1cd2b6f60c92c14662941cb7913");
        metadata.insert(attrs::CONTAINER_FORMAT, "bare");
        metadata.insert(attrs::DISK_FORMAT, "qcow2");
        metadata.insert(attrs::FILENAME, "cirros-0.3.2-x86_64-disk.img");
        metadata.insert(attrs::MIN_DISK, "0");
        metadata.insert(attrs::MIN_RAM, "0");
        metadata.insert(attrs::NAME, "cirros");
        metadata.insert(attrs::SIZE, "13167616");
        metadata
    }

    /// Records allocation calls without touching a real database
    struct MockStore {
        init_calls: Mutex<Vec<String>>,
        root: PathBuf,
    }

    impl MockStore {
        fn new(root: PathBuf) -> Self {
            Self {
                init_calls: Mutex::new(Vec::new()),
                root,
            }
        }
    }

    impl ContentStore for MockStore {
        fn init_unit(
            &self,
            _type_id: &str,
            key: &str,
            _metadata: &Metadata,
            relative_path: &str,
        ) -> Result<PathBuf> {
            self.init_calls.lock().unwrap().push(key.to_string());
            Ok(self.root.join(relative_path))
        }

        fn save_unit(
            &self,
            _type_id: &str,
            _key: &str,
            _metadata: &Metadata,
            _storage_path: &Path,
        ) -> Result<()> {
            Ok(())
        }

        fn units_by_type(&self, _type_id: &str) -> Result<Vec<StoredUnit>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_metadata_preserves_insertion_order() {
        let metadata = cirros_metadata();
        let keys: Vec<&str> = metadata.iter().map(|(k, _)| k).collect();
        assert_eq!(keys[0], attrs::CHECKSUM);
        assert_eq!(keys[7], attrs::SIZE);
    }

    #[test]
    fn test_metadata_insert_replaces_in_place() {
        let mut metadata = Metadata::new();
        metadata.insert("a", "1");
        metadata.insert("b", "2");
        metadata.insert("a", "3");

        assert_eq!(metadata.get("a"), Some("3"));
        assert_eq!(metadata.len(), 2);
        let keys: Vec<&str> = metadata.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_identity_is_checksum_only() {
        let a = ImageRecord::from_manifest_entry("abc", cirros_metadata());
        let b = ImageRecord::from_manifest_entry("abc", Metadata::new());
        let c = ImageRecord::from_manifest_entry("def", cirros_metadata());

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_relative_path_total_without_metadata() {
        let record = ImageRecord::from_manifest_entry("64d7c1cd", Metadata::new());
        assert_eq!(record.relative_path(), "64d7c1cd");
        assert_eq!(record.size(), 0);
    }

    #[test]
    fn test_register_allocates_checksum_slash_filename() {
        let store = MockStore::new(PathBuf::from("/store"));
        let mut record = ImageRecord::from_manifest_entry(
            "64d7c1cd2b6f60c92c14662941cb7913",
            cirros_metadata(),
        );

        record.register(&store).unwrap();
        assert_eq!(
            record.storage_path().unwrap(),
            Path::new("/store/64d7c1cd2b6f60c92c14662941cb7913/cirros-0.3.2-x86_64-disk.img")
        );
    }

    #[test]
    fn test_register_twice_fails_fast() {
        let store = MockStore::new(PathBuf::from("/store"));
        let mut record = ImageRecord::from_manifest_entry(
            "64d7c1cd2b6f60c92c14662941cb7913",
            cirros_metadata(),
        );

        record.register(&store).unwrap();
        let err = record.register(&store).unwrap_err();
        assert!(matches!(err, Error::InitError(_)));
        // The first allocation survives
        assert!(record.storage_path().is_some());
        assert_eq!(store.init_calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_register_without_filename_fails() {
        let store = MockStore::new(PathBuf::from("/store"));
        let mut record = ImageRecord::from_manifest_entry("abc", Metadata::new());
        assert!(matches!(
            record.register(&store),
            Err(Error::InitError(_))
        ));
    }

    #[test]
    fn test_commit_requires_register() {
        let store = MockStore::new(PathBuf::from("/store"));
        let record = ImageRecord::from_manifest_entry("abc", cirros_metadata());
        assert!(matches!(record.commit(&store), Err(Error::InitError(_))));
    }

    #[test]
    fn test_validate_checksum_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("blob.img");
        std::fs::write(&blob, b"abc").unwrap();

        let mut metadata = Metadata::new();
        metadata.insert(attrs::FILENAME, "blob.img");
        metadata.insert(attrs::SIZE, "3");
        let mut record =
            ImageRecord::from_manifest_entry("900150983cd24fb0d6963f7d28e17f72", metadata);
        record.storage_path = Some(blob.clone());

        record.validate().unwrap();

        // Wrong declared size
        let mut bad = record.clone();
        bad.metadata.insert(attrs::SIZE, "4");
        assert!(matches!(bad.validate(), Err(Error::ValidationError(_))));

        // Wrong checksum
        std::fs::write(&blob, b"abd").unwrap();
        assert!(matches!(record.validate(), Err(Error::ValidationError(_))));
    }
}
