// src/config.rs

//! Importer and distributor configuration
//!
//! Configuration is validated up front, before any network activity, so a
//! malformed feed URL or boolean value surfaces as [`Error::ConfigError`]
//! at repo create/update time rather than mid-sync.

use crate::error::{Error, Result};
use std::path::PathBuf;
use url::Url;

/// Default maximum concurrent transfers per sync
pub const DEFAULT_MAX_DOWNLOADS: u32 = 5;

/// Default root for published repository trees
pub const DEFAULT_PUBLISH_ROOT: &str = "/var/lib/mirage/published";

/// Sync-side configuration: where to pull from and how
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    /// Remote feed URL hosting the manifest and image blobs (required)
    pub feed: String,
    /// Maximum concurrent transfers
    pub max_downloads: u32,
    /// Optional transfer rate cap in bytes per second, applied per transfer
    pub max_speed: Option<u64>,
    /// Verify server TLS certificates
    pub ssl_validation: bool,
    /// Optional CA certificate bundle (PEM path)
    pub ssl_ca_cert: Option<String>,
    /// Optional client certificate (PEM path)
    pub ssl_client_cert: Option<String>,
    /// Optional client key (PEM path)
    pub ssl_client_key: Option<String>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    /// Prune images no longer advertised by the feed
    pub remove_missing: bool,
    /// Run checksum/size validation on every downloaded image
    pub validate_downloads: bool,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            feed: String::new(),
            max_downloads: DEFAULT_MAX_DOWNLOADS,
            max_speed: None,
            ssl_validation: true,
            ssl_ca_cert: None,
            ssl_client_cert: None,
            ssl_client_key: None,
            proxy_host: None,
            proxy_port: None,
            proxy_username: None,
            proxy_password: None,
            remove_missing: false,
            validate_downloads: false,
        }
    }
}

impl ImporterConfig {
    /// Create a config for the given feed with all defaults
    pub fn new(feed: impl Into<String>) -> Self {
        Self {
            feed: feed.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration without touching the network
    pub fn validate(&self) -> Result<()> {
        if self.feed.is_empty() {
            return Err(Error::ConfigError("a feed URL is required".to_string()));
        }
        validate_feed_url("feed", &self.feed)?;

        if self.max_downloads == 0 {
            return Err(Error::ConfigError(
                "max_downloads must be at least 1".to_string(),
            ));
        }
        if self.proxy_port.is_some() && self.proxy_host.is_none() {
            return Err(Error::ConfigError(
                "proxy_port was given without a proxy_host".to_string(),
            ));
        }
        if self.ssl_client_cert.is_some() != self.ssl_client_key.is_some() {
            return Err(Error::ConfigError(
                "ssl_client_cert and ssl_client_key must be given together".to_string(),
            ));
        }
        Ok(())
    }

    /// The feed as a parsed URL with a guaranteed trailing slash
    ///
    /// The trailing slash matters: manifest and image URLs are joined onto
    /// the feed, and without it the last path segment would be replaced.
    pub fn feed_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.feed)
            .map_err(|e| Error::ConfigError(format!("invalid feed URL '{}': {e}", self.feed)))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }
}

/// Publish-side configuration
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    /// Root directory for published repository trees
    pub publish_dir: PathBuf,
    /// Optional URL clients are redirected to for served content
    pub redirect_url: Option<String>,
    /// Whether requests for the published repo require an entitlement
    /// certificate (passthrough to the serving layer)
    pub protected: bool,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            publish_dir: PathBuf::from(DEFAULT_PUBLISH_ROOT),
            redirect_url: None,
            protected: false,
        }
    }
}

impl DistributorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.publish_dir.as_os_str().is_empty() {
            return Err(Error::ConfigError(
                "publish_dir must not be empty".to_string(),
            ));
        }
        if let Some(redirect) = &self.redirect_url {
            validate_server_url("redirect_url", redirect)?;
        }
        Ok(())
    }
}

/// Parse a boolean-typed config value supplied as a string
///
/// Accepts `true`/`false` case-insensitively; anything else is a
/// configuration error naming the offending field.
pub fn parse_bool(field: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::ConfigError(format!(
            "the value specified for {field}: '{value}' is not boolean"
        ))),
    }
}

/// Validate a feed URL: scheme always, host for network schemes, path for
/// `file://` feeds
fn validate_feed_url(field: &str, value: &str) -> Result<()> {
    let url = parse_url(field, value)?;
    if url.scheme() != "file" && url.host_str().is_none() {
        return Err(Error::ConfigError(format!(
            "the URL specified for {field} is missing a hostname: '{value}'"
        )));
    }
    if url.scheme() == "file" && url.path().is_empty() {
        return Err(Error::ConfigError(format!(
            "the URL specified for {field} is missing a path: '{value}'"
        )));
    }
    Ok(())
}

/// Validate a server URL: scheme, host, and path are all required
fn validate_server_url(field: &str, value: &str) -> Result<()> {
    let url = parse_url(field, value)?;
    if url.host_str().is_none() {
        return Err(Error::ConfigError(format!(
            "the URL specified for {field} is missing a hostname: '{value}'"
        )));
    }
    if url.path().is_empty() || url.path() == "/" {
        return Err(Error::ConfigError(format!(
            "the URL specified for {field} is missing a path: '{value}'"
        )));
    }
    Ok(())
}

fn parse_url(field: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| match e {
        url::ParseError::RelativeUrlWithoutBase => Error::ConfigError(format!(
            "the URL specified for {field} is missing a scheme: '{value}'"
        )),
        other => Error::ConfigError(format!(
            "the URL specified for {field} is not valid: '{value}' ({other})"
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_http_feed() {
        let config = ImporterConfig::new("http://images.example.com/feed");
        config.validate().unwrap();
    }

    #[test]
    fn test_valid_file_feed() {
        let config = ImporterConfig::new("file:///srv/images/feed");
        config.validate().unwrap();
    }

    #[test]
    fn test_feed_missing_scheme() {
        let config = ImporterConfig::new("images.example.com/feed");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert!(err.to_string().contains("scheme"));
    }

    #[test]
    fn test_feed_required() {
        let config = ImporterConfig::default();
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_feed_url_gets_trailing_slash() {
        let config = ImporterConfig::new("http://images.example.com/feed");
        assert_eq!(
            config.feed_url().unwrap().as_str(),
            "http://images.example.com/feed/"
        );

        // Already-terminated feeds are left alone
        let config = ImporterConfig::new("http://images.example.com/feed/");
        assert_eq!(
            config.feed_url().unwrap().as_str(),
            "http://images.example.com/feed/"
        );
    }

    #[test]
    fn test_feed_url_join_appends() {
        let config = ImporterConfig::new("http://images.example.com/feed");
        let joined = config.feed_url().unwrap().join("a.img").unwrap();
        assert_eq!(joined.as_str(), "http://images.example.com/feed/a.img");
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("protected", "true").unwrap());
        assert!(!parse_bool("protected", "False").unwrap());
        let err = parse_bool("protected", "maybe").unwrap_err();
        assert!(err.to_string().contains("protected"));
    }

    #[test]
    fn test_client_cert_requires_key() {
        let mut config = ImporterConfig::new("https://images.example.com/feed");
        config.ssl_client_cert = Some("/etc/pki/client.crt".to_string());
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));

        config.ssl_client_key = Some("/etc/pki/client.key".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn test_redirect_url_requires_host_and_path() {
        let mut config = DistributorConfig::default();
        config.redirect_url = Some("http://cdn.example.com/images".to_string());
        config.validate().unwrap();

        config.redirect_url = Some("http://cdn.example.com".to_string());
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));

        config.redirect_url = Some("cdn.example.com/images".to_string());
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }
}
