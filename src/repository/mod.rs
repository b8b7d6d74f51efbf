// src/repository/mod.rs

//! Repository sync and publish engine
//!
//! The mirror side of a repository's lifecycle: fetching the remote
//! manifest, reconciling the local inventory against it, downloading
//! missing images with bounded concurrency, and publishing a consistent
//! local web tree with its own manifest.

pub mod client;
pub mod download;
pub mod publish;
pub mod reconcile;
pub mod sync;

pub use client::FeedClient;
pub use download::{CancelHandle, DownloadEvent, DownloadRequest, Downloader};
pub use publish::{PublishReport, WebPublisher};
pub use reconcile::{reconcile, Reconciliation};
pub use sync::{ImageSyncRun, ProgressListener, SyncProgressReport, SyncState};

/// Get current timestamp as ISO 8601 string
pub fn current_timestamp() -> String {
    use chrono::Utc;
    Utc::now().to_rfc3339()
}
