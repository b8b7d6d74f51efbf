// src/error.rs

//! Error types for the mirage library
//!
//! A single crate-wide error enum keeps error handling uniform across the
//! manifest, store, and sync layers. Command handlers in the binary use
//! `anyhow` and convert at the boundary.

use thiserror::Error;

/// Convenience alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A manifest or image transfer failed at the network/file layer
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Manifest bytes are not well-formed XML
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Manifest is well-formed but violates the manifest schema
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Post-download checksum or size mismatch
    #[error("Validation failed: {0}")]
    ValidationError(String),

    /// Malformed configuration value, raised before any network activity
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
}
