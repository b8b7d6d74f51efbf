// src/repository/publish.rs

//! Web-tree publish step
//!
//! Publishing links (or copies, when linking across filesystems fails)
//! every image associated with a repository into
//! `<publish_dir>/<repo_id>/web/`, named by each blob's base filename, and
//! serializes one metadata fragment per image into the fixed manifest
//! filename inside that tree. A filename claimed by two distinct checksums
//! is rejected with an error naming both, rather than silently
//! overwritten.

use crate::config::DistributorConfig;
use crate::error::{Error, Result};
use crate::image::attrs;
use crate::manifest::{ImageManifest, MANIFEST_FILENAME};
use crate::store::{AssociationStore, IMAGE_TYPE_ID};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Summary of one publish run
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub images_published: usize,
    pub web_dir: PathBuf,
    pub manifest_path: PathBuf,
}

/// Publishes a repository's associated images as a web tree
pub struct WebPublisher<'a> {
    repo_id: &'a str,
    config: &'a DistributorConfig,
    associations: &'a dyn AssociationStore,
}

impl<'a> WebPublisher<'a> {
    pub fn new(
        repo_id: &'a str,
        config: &'a DistributorConfig,
        associations: &'a dyn AssociationStore,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            repo_id,
            config,
            associations,
        })
    }

    /// Directory this repository publishes into
    pub fn web_dir(&self) -> PathBuf {
        self.config.publish_dir.join(self.repo_id).join("web")
    }

    /// Publish all associated images and finalize the manifest
    ///
    /// Idempotent: the target tree is created if absent and existing links
    /// are replaced, so republishing an unchanged repository succeeds.
    pub fn publish(&self) -> Result<PublishReport> {
        let web_dir = self.web_dir();
        fs::create_dir_all(&web_dir).map_err(|e| {
            Error::IoError(format!(
                "failed to create publish directory {}: {e}",
                web_dir.display()
            ))
        })?;

        let units = self
            .associations
            .associated_units(self.repo_id, IMAGE_TYPE_ID)?;

        let mut fragments = Vec::with_capacity(units.len());
        let mut claimed: HashMap<String, String> = HashMap::new();
        for unit in &units {
            let filename = unit
                .metadata
                .get(attrs::FILENAME)
                .map(str::to_string)
                .or_else(|| {
                    unit.storage_path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                })
                .ok_or_else(|| {
                    Error::InitError(format!("unit {} has no filename", unit.key))
                })?;

            if let Some(existing) = claimed.get(&filename) {
                return Err(Error::AlreadyExists(format!(
                    "publish filename collision in repository '{}': '{}' is provided by both {} and {}",
                    self.repo_id, filename, existing, unit.key
                )));
            }
            claimed.insert(filename.clone(), unit.key.clone());

            link_or_copy(&unit.storage_path, &web_dir.join(&filename))?;
            debug!("published {} as {}", unit.key, filename);
            fragments.push(unit.metadata.clone());
        }

        let manifest_bytes = ImageManifest::serialize(&fragments)?;
        let manifest_path = web_dir.join(MANIFEST_FILENAME);
        fs::write(&manifest_path, &manifest_bytes).map_err(|e| {
            Error::IoError(format!(
                "failed to write manifest {}: {e}",
                manifest_path.display()
            ))
        })?;

        info!(
            "published {} images for repository '{}' to {}",
            units.len(),
            self.repo_id,
            web_dir.display()
        );
        Ok(PublishReport {
            images_published: units.len(),
            web_dir,
            manifest_path,
        })
    }
}

/// Hard-link a blob into the publish tree, copying when linking fails
/// (e.g. across filesystems). Any existing entry is replaced.
fn link_or_copy(source: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_file(dest).map_err(|e| {
            Error::IoError(format!("failed to replace {}: {e}", dest.display()))
        })?;
    }
    if fs::hard_link(source, dest).is_ok() {
        return Ok(());
    }
    fs::copy(source, dest).map(|_| ()).map_err(|e| {
        Error::IoError(format!(
            "failed to copy {} to {}: {e}",
            source.display(),
            dest.display()
        ))
    })
}
