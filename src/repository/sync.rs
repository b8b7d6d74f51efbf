// src/repository/sync.rs

//! Repository synchronization
//!
//! One [`ImageSyncRun`] owns a single sync's lifecycle: the state machine,
//! the progress report, cancellation, and the orchestration of manifest
//! fetch, reconciliation, downloads, and pruning. Runs are single-use; a
//! fresh one is constructed per sync.
//!
//! The controller drains download events on its own thread and is the only
//! writer of the progress report, so no locking is needed around report
//! mutation. Store handles are injected explicitly.

use crate::config::ImporterConfig;
use crate::error::{Error, Result};
use crate::image::ImageRecord;
use crate::manifest::{ImageManifest, MANIFEST_FILENAME};
use crate::store::{AssociationStore, ContentStore, IMAGE_TYPE_ID};
use std::collections::HashMap;
use std::fmt;
use tracing::{error, info, warn};

use super::download::{CancelHandle, DownloadEvent, DownloadRequest, Downloader};
use super::reconcile::reconcile;

/// Sync lifecycle states
///
/// Transitions are linear with no backward edges: `Cancelled` is reachable
/// from any in-progress state, and `Complete` is downgraded to
/// `FilesFailed` when any per-file failure was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    NotStarted,
    ManifestInProgress,
    ManifestFailed,
    FilesInProgress,
    FilesFailed,
    Complete,
    Cancelled,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::NotStarted => "not_started",
            SyncState::ManifestInProgress => "manifest_in_progress",
            SyncState::ManifestFailed => "manifest_failed",
            SyncState::FilesInProgress => "files_in_progress",
            SyncState::FilesFailed => "files_failed",
            SyncState::Complete => "complete",
            SyncState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncState::ManifestFailed
                | SyncState::FilesFailed
                | SyncState::Complete
                | SyncState::Cancelled
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded per-image failure
#[derive(Debug, Clone)]
pub struct ImageFailure {
    pub checksum: String,
    pub filename: String,
    pub error: String,
}

/// Progress state for one sync invocation
///
/// Mutated only by the sync run; the terminal snapshot is what the caller
/// receives back.
#[derive(Debug, Clone)]
pub struct SyncProgressReport {
    pub state: SyncState,
    pub total_bytes: u64,
    pub finished_bytes: u64,
    pub num_files: usize,
    pub num_files_finished: usize,
    pub failed_images: Vec<ImageFailure>,
    pub error_message: Option<String>,
}

impl SyncProgressReport {
    fn new() -> Self {
        Self {
            state: SyncState::NotStarted,
            total_bytes: 0,
            finished_bytes: 0,
            num_files: 0,
            num_files_finished: 0,
            failed_images: Vec::new(),
            error_message: None,
        }
    }

    /// Transition to a new state
    ///
    /// Setting `Complete` lands on `FilesFailed` instead when any per-file
    /// failure was collected during the files phase.
    pub fn set_state(&mut self, state: SyncState) {
        self.state = if state == SyncState::Complete && !self.failed_images.is_empty() {
            SyncState::FilesFailed
        } else {
            state
        };
    }

    pub fn add_failed_image(&mut self, checksum: &str, filename: &str, error: String) {
        self.failed_images.push(ImageFailure {
            checksum: checksum.to_string(),
            filename: filename.to_string(),
            error,
        });
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_images.is_empty()
    }
}

impl Default for SyncProgressReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback fed intermediate report snapshots, e.g. for a CLI renderer
pub type ProgressListener<'a> = Box<dyn FnMut(&SyncProgressReport) + 'a>;

/// State for a single repository sync (do not reuse)
pub struct ImageSyncRun<'a> {
    repo_id: String,
    config: ImporterConfig,
    store: &'a dyn ContentStore,
    associations: &'a dyn AssociationStore,
    downloader: Downloader,
    report: SyncProgressReport,
    listener: Option<ProgressListener<'a>>,
}

impl std::fmt::Debug for ImageSyncRun<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSyncRun")
            .field("repo_id", &self.repo_id)
            .field("config", &self.config)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl<'a> ImageSyncRun<'a> {
    /// Set up a sync run; fails on invalid configuration before any
    /// network activity
    pub fn new(
        repo_id: &str,
        config: &ImporterConfig,
        store: &'a dyn ContentStore,
        associations: &'a dyn AssociationStore,
    ) -> Result<Self> {
        config.validate()?;
        let downloader = Downloader::new(config)?;
        Ok(Self {
            repo_id: repo_id.to_string(),
            config: config.clone(),
            store,
            associations,
            downloader,
            report: SyncProgressReport::new(),
            listener: None,
        })
    }

    /// Attach a progress listener receiving intermediate report snapshots
    pub fn with_listener(mut self, listener: ProgressListener<'a>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Handle through which this sync can be cancelled from another thread
    pub fn cancel_handle(&self) -> CancelHandle {
        self.downloader.cancel_handle()
    }

    /// Perform the sync and return the final report
    ///
    /// Transport, parse, and per-image failures are reported through the
    /// returned report's state; an `Err` here means the local store itself
    /// failed.
    pub fn perform_sync(mut self) -> Result<SyncProgressReport> {
        info!(
            "starting sync of repository '{}' from {}",
            self.repo_id, self.config.feed
        );

        self.set_state(SyncState::ManifestInProgress);
        let manifest = match self.download_manifest() {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("manifest phase failed for '{}': {}", self.repo_id, e);
                self.report.error_message = Some(e.to_string());
                self.set_state(SyncState::ManifestFailed);
                return Ok(self.report.clone());
            }
        };

        if self.cancelled() {
            self.set_state(SyncState::Cancelled);
            return Ok(self.report.clone());
        }

        self.set_state(SyncState::FilesInProgress);
        let store_units = self.store.units_by_type(IMAGE_TYPE_ID)?;
        let associated_units = self
            .associations
            .associated_units(&self.repo_id, IMAGE_TYPE_ID)?;
        let recon = reconcile(
            &manifest,
            &store_units,
            &associated_units,
            self.config.remove_missing,
        );
        info!(
            "repository '{}': {} to fetch, {} to associate, {} to prune",
            self.repo_id,
            recon.to_fetch.len(),
            recon.to_associate.len(),
            recon.to_prune.len()
        );

        // Images already in the store only need an association
        for record in &recon.to_associate {
            self.associations.associate(&self.repo_id, record.checksum())?;
        }

        let feed = self.config.feed_url()?;
        let mut records: HashMap<String, ImageRecord> = HashMap::new();
        let mut requests = Vec::new();
        self.report.num_files = recon.to_fetch.len();
        self.report.total_bytes = 0;
        for mut record in recon.to_fetch {
            record.register(self.store)?;
            let filename = record.filename().ok_or_else(|| {
                Error::InitError(format!("image {} has no filename", record.checksum()))
            })?;
            let url = feed.join(filename).map_err(|e| {
                Error::ConfigError(format!("cannot build image URL for '{filename}': {e}"))
            })?;
            let destination = record
                .storage_path()
                .ok_or_else(|| {
                    Error::InitError(format!(
                        "image {} has no storage location",
                        record.checksum()
                    ))
                })?
                .to_path_buf();

            self.report.total_bytes += record.size();
            requests.push(DownloadRequest {
                url,
                destination,
                checksum: record.checksum().to_string(),
            });
            records.insert(record.checksum().to_string(), record);
        }
        self.notify();

        if !requests.is_empty() {
            let receiver = self.downloader.download(requests)?;
            let mut bytes_seen: HashMap<String, u64> = HashMap::new();
            for event in receiver {
                if self.cancelled() {
                    // In-flight results observed after cancellation are
                    // discarded rather than counted
                    self.set_state(SyncState::Cancelled);
                    break;
                }
                match event {
                    DownloadEvent::Progress {
                        checksum,
                        bytes_downloaded,
                    } => {
                        self.record_progress(&mut bytes_seen, &checksum, bytes_downloaded);
                    }
                    DownloadEvent::Succeeded {
                        checksum,
                        bytes_downloaded,
                    } => {
                        self.record_progress(&mut bytes_seen, &checksum, bytes_downloaded);
                        let Some(record) = records.get(&checksum) else {
                            warn!("completion for unknown image {}", checksum);
                            continue;
                        };
                        if self.config.validate_downloads {
                            if let Err(e) = record.validate() {
                                warn!("validation failed for {}: {}", checksum, e);
                                self.report.add_failed_image(
                                    &checksum,
                                    record.filename().unwrap_or(""),
                                    e.to_string(),
                                );
                                self.notify();
                                continue;
                            }
                        }
                        record.commit(self.store)?;
                        self.associations.associate(&self.repo_id, &checksum)?;
                        self.report.num_files_finished += 1;
                        self.notify();
                    }
                    DownloadEvent::Failed { checksum, error } => {
                        error!("Failed to download {}: {}", checksum, error);
                        let filename = records
                            .get(&checksum)
                            .and_then(|r| r.filename())
                            .unwrap_or("");
                        self.report.add_failed_image(&checksum, filename, error);
                        self.notify();
                    }
                }
            }
        }

        if self.report.state == SyncState::Cancelled {
            info!("sync of repository '{}' was cancelled", self.repo_id);
            return Ok(self.report.clone());
        }

        if self.config.remove_missing {
            for unit in &recon.to_prune {
                info!(
                    "pruning image {} from repository '{}'",
                    unit.key, self.repo_id
                );
                self.associations.unassociate(&self.repo_id, &unit.key)?;
            }
        }

        self.set_state(SyncState::Complete);
        info!(
            "sync of repository '{}' finished: {} ({}/{} files)",
            self.repo_id,
            self.report.state,
            self.report.num_files_finished,
            self.report.num_files
        );
        Ok(self.report.clone())
    }

    /// Fetch and parse the remote manifest
    fn download_manifest(&mut self) -> Result<ImageManifest> {
        let feed = self.config.feed_url()?;
        let manifest_url = feed.join(MANIFEST_FILENAME).map_err(|e| {
            Error::ConfigError(format!("cannot build manifest URL: {e}"))
        })?;
        info!("fetching manifest from {}", manifest_url);
        let bytes = self.downloader.fetch_bytes(&manifest_url)?;
        ImageManifest::parse(&bytes)
    }

    /// Fold a cumulative per-image byte count into the aggregate report
    fn record_progress(
        &mut self,
        bytes_seen: &mut HashMap<String, u64>,
        checksum: &str,
        cumulative: u64,
    ) {
        let seen = bytes_seen.entry(checksum.to_string()).or_insert(0);
        if cumulative > *seen {
            self.report.finished_bytes += cumulative - *seen;
            *seen = cumulative;
        }
        self.notify();
    }

    fn set_state(&mut self, state: SyncState) {
        self.report.set_state(state);
        self.notify();
    }

    fn cancelled(&self) -> bool {
        self.downloader.cancel_handle().is_cancelled()
    }

    fn notify(&mut self) {
        if let Some(listener) = self.listener.as_mut() {
            listener(&self.report);
        }
    }
}
