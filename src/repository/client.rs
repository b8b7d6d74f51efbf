// src/repository/client.rs

//! Transport layer for feed downloads
//!
//! Wraps a reqwest blocking client for http(s) feeds and a plain file
//! copier for `file://` feeds, streaming content to disk in chunks and
//! reporting cumulative per-transfer progress. TLS validation, client
//! certificates, CA bundle, and proxy settings are configuration
//! passthrough into the client builder.

use crate::config::ImporterConfig;
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

/// Connection timeout for HTTP requests
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed timeout for the single manifest fetch. Image transfers have no
/// overall timeout; a stalled transfer only occupies one worker slot.
pub const MANIFEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Transport client selected by URL scheme
#[derive(Clone)]
pub struct FeedClient {
    client: Client,
}

impl FeedClient {
    /// Build a client from the importer configuration
    pub fn new(config: &ImporterConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(None);

        if !config.ssl_validation {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca_path) = &config.ssl_ca_cert {
            let pem = fs::read(ca_path).map_err(|e| {
                Error::ConfigError(format!("cannot read ssl_ca_cert {ca_path}: {e}"))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                Error::ConfigError(format!("invalid CA certificate {ca_path}: {e}"))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert_path), Some(key_path)) =
            (&config.ssl_client_cert, &config.ssl_client_key)
        {
            let mut pem = fs::read(cert_path).map_err(|e| {
                Error::ConfigError(format!("cannot read ssl_client_cert {cert_path}: {e}"))
            })?;
            let key = fs::read(key_path).map_err(|e| {
                Error::ConfigError(format!("cannot read ssl_client_key {key_path}: {e}"))
            })?;
            pem.extend_from_slice(&key);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                Error::ConfigError(format!("invalid client certificate/key pair: {e}"))
            })?;
            builder = builder.identity(identity);
        }
        if let Some(host) = &config.proxy_host {
            // A bare hostname would parse as a URL scheme
            let base = if host.contains("://") {
                host.clone()
            } else {
                format!("http://{host}")
            };
            let proxy_url = match config.proxy_port {
                Some(port) => format!("{base}:{port}"),
                None => base,
            };
            let mut proxy = reqwest::Proxy::all(&proxy_url).map_err(|e| {
                Error::ConfigError(format!("invalid proxy '{proxy_url}': {e}"))
            })?;
            if let Some(username) = &config.proxy_username {
                proxy = proxy
                    .basic_auth(username, config.proxy_password.as_deref().unwrap_or(""));
            }
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Fetch a small artifact fully into memory (used for the manifest)
    pub fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        debug!("fetching {}", url);
        if url.scheme() == "file" {
            let path = file_url_path(url)?;
            return fs::read(&path).map_err(|e| {
                Error::DownloadError(format!("Failed to read {}: {e}", path.display()))
            });
        }

        let response = self
            .client
            .get(url.clone())
            .timeout(MANIFEST_TIMEOUT)
            .send()
            .map_err(|e| Error::DownloadError(format!("Failed to fetch {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let bytes = response
            .bytes()
            .map_err(|e| Error::DownloadError(format!("Failed to read response: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Stream one URL to a destination path
    ///
    /// Content is written to a temporary file and atomically renamed into
    /// place on success; the temporary file is removed on failure.
    /// `on_progress` receives monotonically non-decreasing cumulative
    /// bytes for this transfer.
    pub fn transfer(
        &self,
        url: &Url,
        dest: &Path,
        max_speed: Option<u64>,
        cancel: &AtomicBool,
        on_progress: &mut dyn FnMut(u64),
    ) -> Result<u64> {
        debug!("transferring {} to {}", url, dest.display());
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!(
                    "Failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let temp_path = dest.with_extension("tmp");
        let result = self.transfer_to_temp(url, &temp_path, max_speed, cancel, on_progress);

        match result {
            Ok(bytes) => {
                fs::rename(&temp_path, dest).map_err(|e| {
                    Error::IoError(format!(
                        "Failed to move {} to {}: {e}",
                        temp_path.display(),
                        dest.display()
                    ))
                })?;
                info!("transferred {} bytes to {}", bytes, dest.display());
                Ok(bytes)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }

    fn transfer_to_temp(
        &self,
        url: &Url,
        temp_path: &Path,
        max_speed: Option<u64>,
        cancel: &AtomicBool,
        on_progress: &mut dyn FnMut(u64),
    ) -> Result<u64> {
        if url.scheme() == "file" {
            let path = file_url_path(url)?;
            let mut reader = File::open(&path).map_err(|e| {
                Error::DownloadError(format!("Failed to open {}: {e}", path.display()))
            })?;
            stream_to_file(&mut reader, temp_path, max_speed, cancel, on_progress)
        } else {
            let mut response = self
                .client
                .get(url.clone())
                .send()
                .map_err(|e| Error::DownloadError(format!("Failed to fetch {url}: {e}")))?;

            if !response.status().is_success() {
                return Err(Error::DownloadError(format!(
                    "HTTP {} from {}",
                    response.status(),
                    url
                )));
            }
            stream_to_file(&mut response, temp_path, max_speed, cancel, on_progress)
        }
    }
}

/// Copy a reader to a file in chunks with progress, cancellation, and
/// optional rate limiting
fn stream_to_file(
    reader: &mut dyn Read,
    temp_path: &Path,
    max_speed: Option<u64>,
    cancel: &AtomicBool,
    on_progress: &mut dyn FnMut(u64),
) -> Result<u64> {
    let mut file = File::create(temp_path).map_err(|e| {
        Error::IoError(format!(
            "Failed to create file {}: {e}",
            temp_path.display()
        ))
    })?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    let started = Instant::now();

    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(Error::DownloadError("transfer cancelled".to_string()));
        }

        let n = reader
            .read(&mut buffer)
            .map_err(|e| Error::DownloadError(format!("Failed to read transfer data: {e}")))?;
        if n == 0 {
            break;
        }

        file.write_all(&buffer[..n])
            .map_err(|e| Error::IoError(format!("Failed to write data: {e}")))?;
        downloaded += n as u64;
        on_progress(downloaded);

        if let Some(limit) = max_speed {
            throttle(started, downloaded, limit);
        }
    }

    Ok(downloaded)
}

/// Sleep long enough to keep the transfer at or below `limit` bytes/sec
fn throttle(started: Instant, bytes: u64, limit: u64) {
    if limit == 0 {
        return;
    }
    let expected = bytes as f64 / limit as f64;
    let elapsed = started.elapsed().as_secs_f64();
    if expected > elapsed {
        std::thread::sleep(Duration::from_secs_f64(expected - elapsed));
    }
}

fn file_url_path(url: &Url) -> Result<PathBuf> {
    url.to_file_path()
        .map_err(|_| Error::DownloadError(format!("not a usable file URL: {url}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_client() -> FeedClient {
        FeedClient::new(&ImporterConfig::new("file:///tmp/feed")).unwrap()
    }

    #[test]
    fn test_fetch_bytes_from_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.xml");
        fs::write(&path, b"<doc/>").unwrap();

        let url = Url::from_file_path(&path).unwrap();
        assert_eq!(local_client().fetch_bytes(&url).unwrap(), b"<doc/>");
    }

    #[test]
    fn test_fetch_bytes_missing_file() {
        let url = Url::parse("file:///definitely/not/here.xml").unwrap();
        assert!(matches!(
            local_client().fetch_bytes(&url),
            Err(Error::DownloadError(_))
        ));
    }

    #[test]
    fn test_transfer_streams_with_progress() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("blob.img");
        let payload = vec![7u8; 20000];
        fs::write(&source, &payload).unwrap();

        let dest = dir.path().join("out/blob.img");
        let url = Url::from_file_path(&source).unwrap();
        let cancel = AtomicBool::new(false);

        let mut reports = Vec::new();
        let bytes = local_client()
            .transfer(&url, &dest, None, &cancel, &mut |b| reports.push(b))
            .unwrap();

        assert_eq!(bytes, payload.len() as u64);
        assert_eq!(fs::read(&dest).unwrap(), payload);
        // Cumulative and monotonically non-decreasing, ending at the total
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*reports.last().unwrap(), payload.len() as u64);
        // No temp file left behind
        assert!(!dest.with_extension("tmp").exists());
    }

    #[test]
    fn test_transfer_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out/blob.img");
        let url = Url::parse("file:///definitely/not/here.img").unwrap();
        let cancel = AtomicBool::new(false);

        let err = local_client()
            .transfer(&url, &dest, None, &cancel, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::DownloadError(_)));
        assert!(!dest.exists());
        assert!(!dest.with_extension("tmp").exists());
    }

    #[test]
    fn test_transfer_observes_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("blob.img");
        fs::write(&source, vec![0u8; 1000]).unwrap();

        let dest = dir.path().join("out/blob.img");
        let url = Url::from_file_path(&source).unwrap();
        let cancel = AtomicBool::new(true);

        let err = local_client()
            .transfer(&url, &dest, None, &cancel, &mut |_| {})
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(!dest.exists());
    }
}
