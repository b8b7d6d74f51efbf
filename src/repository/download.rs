// src/repository/download.rs

//! Concurrent download orchestration
//!
//! The [`Downloader`] accepts a batch of requests and executes them on a
//! worker pool bounded by the configured concurrency limit. Results are
//! delivered as explicit tagged [`DownloadEvent`]s over a channel: zero or
//! more `Progress` events per request, strictly followed by exactly one
//! terminal `Succeeded` or `Failed` event. The consumer drains the channel
//! single-threadedly, so progress state has one writer.
//!
//! Cancellation is cooperative: pending requests are skipped without a
//! terminal event, and in-flight transfers abort at the next chunk
//! boundary. Consumers discard anything observed after cancellation.

use crate::config::ImporterConfig;
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::client::FeedClient;

/// One download to perform: a source URL, a destination path, and the
/// identity key of the associated image record
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: Url,
    pub destination: PathBuf,
    pub checksum: String,
}

/// Result events delivered by the worker pool
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Cumulative bytes transferred so far for one request; monotonically
    /// non-decreasing per request
    Progress {
        checksum: String,
        bytes_downloaded: u64,
    },
    Succeeded {
        checksum: String,
        bytes_downloaded: u64,
    },
    Failed {
        checksum: String,
        error: String,
    },
}

/// Shared cancellation flag for one downloader
#[derive(Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that outstanding work stop
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn as_atomic(&self) -> &AtomicBool {
        &self.flag
    }
}

/// Executes download batches with bounded concurrency and optional rate
/// limiting
pub struct Downloader {
    client: Arc<FeedClient>,
    max_downloads: usize,
    max_speed: Option<u64>,
    cancel: CancelHandle,
}

impl Downloader {
    /// Build a downloader from the importer configuration
    pub fn new(config: &ImporterConfig) -> Result<Self> {
        Ok(Self {
            client: Arc::new(FeedClient::new(config)?),
            max_downloads: config.max_downloads.max(1) as usize,
            max_speed: config.max_speed,
            cancel: CancelHandle::new(),
        })
    }

    /// Handle through which this downloader can be cancelled
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Synchronous single fetch into memory (the manifest)
    pub fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        self.client.fetch_bytes(url)
    }

    /// Dispatch a batch of requests to the worker pool
    ///
    /// Returns immediately with the event channel; the channel closes once
    /// every request has been resolved or skipped due to cancellation.
    pub fn download(&self, requests: Vec<DownloadRequest>) -> Result<Receiver<DownloadEvent>> {
        let (tx, rx) = mpsc::channel();
        if requests.is_empty() {
            return Ok(rx);
        }

        let client = Arc::clone(&self.client);
        let cancel = self.cancel.clone();
        let max_speed = self.max_speed;
        let threads = self.max_downloads.min(requests.len());
        debug!(
            "dispatching {} downloads across {} workers",
            requests.len(),
            threads
        );

        std::thread::Builder::new()
            .name("mirage-downloads".to_string())
            .spawn(move || {
                let pool = match rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                {
                    Ok(pool) => pool,
                    Err(e) => {
                        warn!("failed to start download pool: {}", e);
                        for request in &requests {
                            let _ = tx.send(DownloadEvent::Failed {
                                checksum: request.checksum.clone(),
                                error: format!("failed to start download pool: {e}"),
                            });
                        }
                        return;
                    }
                };

                pool.scope(|scope| {
                    for request in &requests {
                        let tx = tx.clone();
                        let client = Arc::clone(&client);
                        let cancel = cancel.clone();
                        scope.spawn(move |_| {
                            if cancel.is_cancelled() {
                                return;
                            }

                            let progress_tx = tx.clone();
                            let checksum = request.checksum.clone();
                            let mut on_progress = move |bytes: u64| {
                                let _ = progress_tx.send(DownloadEvent::Progress {
                                    checksum: checksum.clone(),
                                    bytes_downloaded: bytes,
                                });
                            };

                            let result = client.transfer(
                                &request.url,
                                &request.destination,
                                max_speed,
                                cancel.as_atomic(),
                                &mut on_progress,
                            );
                            let event = match result {
                                Ok(bytes) => DownloadEvent::Succeeded {
                                    checksum: request.checksum.clone(),
                                    bytes_downloaded: bytes,
                                },
                                Err(e) => DownloadEvent::Failed {
                                    checksum: request.checksum.clone(),
                                    error: e.to_string(),
                                },
                            };
                            let _ = tx.send(event);
                        });
                    }
                });
            })
            .map_err(|e| Error::InitError(format!("failed to spawn download thread: {e}")))?;

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn request_for(dir: &std::path::Path, name: &str, payload: &[u8]) -> DownloadRequest {
        let source = dir.join(name);
        fs::write(&source, payload).unwrap();
        DownloadRequest {
            url: Url::from_file_path(&source).unwrap(),
            destination: dir.join("out").join(name),
            checksum: name.to_string(),
        }
    }

    #[test]
    fn test_batch_delivers_one_terminal_event_per_request() {
        let dir = tempfile::tempdir().unwrap();
        let requests = vec![
            request_for(dir.path(), "a.img", b"aaaa"),
            request_for(dir.path(), "b.img", b"bbbbbb"),
            request_for(dir.path(), "c.img", b"cc"),
        ];

        let config = ImporterConfig::new("file:///feed");
        let downloader = Downloader::new(&config).unwrap();
        let rx = downloader.download(requests).unwrap();

        let mut terminals: HashMap<String, u64> = HashMap::new();
        let mut progress: HashMap<String, Vec<u64>> = HashMap::new();
        for event in rx {
            match event {
                DownloadEvent::Progress {
                    checksum,
                    bytes_downloaded,
                } => progress.entry(checksum).or_default().push(bytes_downloaded),
                DownloadEvent::Succeeded {
                    checksum,
                    bytes_downloaded,
                } => {
                    assert!(terminals.insert(checksum, bytes_downloaded).is_none());
                }
                DownloadEvent::Failed { checksum, error } => {
                    panic!("unexpected failure for {checksum}: {error}");
                }
            }
        }

        assert_eq!(terminals.len(), 3);
        assert_eq!(terminals["a.img"], 4);
        assert_eq!(terminals["b.img"], 6);
        assert_eq!(terminals["c.img"], 2);
        // Per-request progress is cumulative and non-decreasing
        for reports in progress.values() {
            assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        }
        assert!(dir.path().join("out/a.img").exists());
    }

    #[test]
    fn test_partial_failure_does_not_abort_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let mut requests = vec![
            request_for(dir.path(), "a.img", b"aaaa"),
            request_for(dir.path(), "b.img", b"bbbb"),
        ];
        requests.push(DownloadRequest {
            url: Url::parse("file:///definitely/not/here.img").unwrap(),
            destination: dir.path().join("out/missing.img"),
            checksum: "missing".to_string(),
        });

        let downloader = Downloader::new(&ImporterConfig::new("file:///feed")).unwrap();
        let rx = downloader.download(requests).unwrap();

        let mut succeeded = 0;
        let mut failed = 0;
        for event in rx {
            match event {
                DownloadEvent::Succeeded { .. } => succeeded += 1,
                DownloadEvent::Failed { checksum, .. } => {
                    assert_eq!(checksum, "missing");
                    failed += 1;
                }
                DownloadEvent::Progress { .. } => {}
            }
        }
        assert_eq!(succeeded, 2);
        assert_eq!(failed, 1);
    }

    #[test]
    fn test_cancelled_downloader_skips_pending_requests() {
        let dir = tempfile::tempdir().unwrap();
        let requests = vec![
            request_for(dir.path(), "a.img", b"aaaa"),
            request_for(dir.path(), "b.img", b"bbbb"),
        ];

        let downloader = Downloader::new(&ImporterConfig::new("file:///feed")).unwrap();
        downloader.cancel();
        let rx = downloader.download(requests).unwrap();

        // Everything was skipped; the channel just closes
        assert_eq!(rx.iter().count(), 0);
    }

    #[test]
    fn test_empty_batch_closes_immediately() {
        let downloader = Downloader::new(&ImporterConfig::new("file:///feed")).unwrap();
        let rx = downloader.download(Vec::new()).unwrap();
        assert_eq!(rx.iter().count(), 0);
    }
}
