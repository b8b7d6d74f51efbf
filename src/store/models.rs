// src/store/models.rs

//! Data models for local store entities
//!
//! Rust structs that correspond to database tables, with methods for
//! creating, reading, updating, and deleting records. All methods take an
//! explicit `&Connection`.

use crate::config::{DistributorConfig, ImporterConfig, DEFAULT_MAX_DOWNLOADS};
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;

/// A content unit row, keyed by checksum
#[derive(Debug, Clone)]
pub struct ContentUnit {
    pub id: Option<i64>,
    pub type_id: String,
    pub checksum: String,
    /// JSON-serialized ordered metadata
    pub metadata: String,
    pub storage_path: String,
    pub size: i64,
    pub created_at: Option<String>,
}

impl ContentUnit {
    pub fn new(
        type_id: String,
        checksum: String,
        metadata: String,
        storage_path: String,
        size: i64,
    ) -> Self {
        Self {
            id: None,
            type_id,
            checksum,
            metadata,
            storage_path,
            size,
            created_at: None,
        }
    }

    /// Insert this unit, replacing any prior row with the same checksum
    pub fn upsert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO units (type_id, checksum, metadata, storage_path, size)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(checksum) DO UPDATE SET
                 type_id = excluded.type_id,
                 metadata = excluded.metadata,
                 storage_path = excluded.storage_path,
                 size = excluded.size",
            params![
                &self.type_id,
                &self.checksum,
                &self.metadata,
                &self.storage_path,
                self.size,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a unit by checksum
    pub fn find_by_checksum(conn: &Connection, checksum: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, type_id, checksum, metadata, storage_path, size, created_at
             FROM units WHERE checksum = ?1",
        )?;

        let unit = stmt.query_row([checksum], Self::from_row).optional()?;
        Ok(unit)
    }

    /// List all units of a type
    pub fn list_by_type(conn: &Connection, type_id: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, type_id, checksum, metadata, storage_path, size, created_at
             FROM units WHERE type_id = ?1 ORDER BY id",
        )?;

        let units = stmt
            .query_map([type_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(units)
    }

    /// Delete a unit by checksum
    pub fn delete(conn: &Connection, checksum: &str) -> Result<()> {
        conn.execute("DELETE FROM units WHERE checksum = ?1", [checksum])?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            type_id: row.get(1)?,
            checksum: row.get(2)?,
            metadata: row.get(3)?,
            storage_path: row.get(4)?,
            size: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

/// A registered repository with its sync and publish settings
#[derive(Debug, Clone)]
pub struct Repository {
    pub id: Option<i64>,
    pub repo_id: String,
    pub feed: String,
    pub auto_publish: bool,
    pub protected: bool,
    pub remove_missing: bool,
    pub validate_downloads: bool,
    pub max_downloads: Option<u32>,
    pub max_speed: Option<u64>,
    pub ssl_validation: Option<bool>,
    pub ssl_ca_cert: Option<String>,
    pub ssl_client_cert: Option<String>,
    pub ssl_client_key: Option<String>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub publish_dir: Option<String>,
    pub last_sync: Option<String>,
}

impl Repository {
    pub fn new(repo_id: String, feed: String) -> Self {
        Self {
            id: None,
            repo_id,
            feed,
            auto_publish: false,
            protected: false,
            remove_missing: false,
            validate_downloads: false,
            max_downloads: None,
            max_speed: None,
            ssl_validation: None,
            ssl_ca_cert: None,
            ssl_client_cert: None,
            ssl_client_key: None,
            proxy_host: None,
            proxy_port: None,
            proxy_username: None,
            proxy_password: None,
            publish_dir: None,
            last_sync: None,
        }
    }

    /// Insert this repository into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO repositories (
                repo_id, feed, auto_publish, protected, remove_missing,
                validate_downloads, max_downloads, max_speed, ssl_validation,
                ssl_ca_cert, ssl_client_cert, ssl_client_key, proxy_host,
                proxy_port, proxy_username, proxy_password, publish_dir, last_sync
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                       ?14, ?15, ?16, ?17, ?18)",
            params![
                &self.repo_id,
                &self.feed,
                self.auto_publish,
                self.protected,
                self.remove_missing,
                self.validate_downloads,
                self.max_downloads,
                self.max_speed.map(|v| v as i64),
                self.ssl_validation,
                &self.ssl_ca_cert,
                &self.ssl_client_cert,
                &self.ssl_client_key,
                &self.proxy_host,
                self.proxy_port,
                &self.proxy_username,
                &self.proxy_password,
                &self.publish_dir,
                &self.last_sync,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Update all settings of this repository
    pub fn update(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "UPDATE repositories SET
                feed = ?2, auto_publish = ?3, protected = ?4, remove_missing = ?5,
                validate_downloads = ?6, max_downloads = ?7, max_speed = ?8,
                ssl_validation = ?9, ssl_ca_cert = ?10, ssl_client_cert = ?11,
                ssl_client_key = ?12, proxy_host = ?13, proxy_port = ?14,
                proxy_username = ?15, proxy_password = ?16, publish_dir = ?17,
                last_sync = ?18
             WHERE repo_id = ?1",
            params![
                &self.repo_id,
                &self.feed,
                self.auto_publish,
                self.protected,
                self.remove_missing,
                self.validate_downloads,
                self.max_downloads,
                self.max_speed.map(|v| v as i64),
                self.ssl_validation,
                &self.ssl_ca_cert,
                &self.ssl_client_cert,
                &self.ssl_client_key,
                &self.proxy_host,
                self.proxy_port,
                &self.proxy_username,
                &self.proxy_password,
                &self.publish_dir,
                &self.last_sync,
            ],
        )?;
        Ok(())
    }

    /// Find a repository by its identifier
    pub fn find_by_repo_id(conn: &Connection, repo_id: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, repo_id, feed, auto_publish, protected, remove_missing,
                    validate_downloads, max_downloads, max_speed, ssl_validation,
                    ssl_ca_cert, ssl_client_cert, ssl_client_key, proxy_host,
                    proxy_port, proxy_username, proxy_password, publish_dir, last_sync
             FROM repositories WHERE repo_id = ?1",
        )?;

        let repo = stmt.query_row([repo_id], Self::from_row).optional()?;
        Ok(repo)
    }

    /// List all repositories
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, repo_id, feed, auto_publish, protected, remove_missing,
                    validate_downloads, max_downloads, max_speed, ssl_validation,
                    ssl_ca_cert, ssl_client_cert, ssl_client_key, proxy_host,
                    proxy_port, proxy_username, proxy_password, publish_dir, last_sync
             FROM repositories ORDER BY repo_id",
        )?;

        let repos = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(repos)
    }

    /// Delete a repository and its associations
    pub fn delete(conn: &Connection, repo_id: &str) -> Result<()> {
        conn.execute("DELETE FROM associations WHERE repo_id = ?1", [repo_id])?;
        conn.execute("DELETE FROM repositories WHERE repo_id = ?1", [repo_id])?;
        Ok(())
    }

    /// Build the sync-side configuration from this row
    pub fn importer_config(&self) -> ImporterConfig {
        ImporterConfig {
            feed: self.feed.clone(),
            max_downloads: self.max_downloads.unwrap_or(DEFAULT_MAX_DOWNLOADS),
            max_speed: self.max_speed,
            ssl_validation: self.ssl_validation.unwrap_or(true),
            ssl_ca_cert: self.ssl_ca_cert.clone(),
            ssl_client_cert: self.ssl_client_cert.clone(),
            ssl_client_key: self.ssl_client_key.clone(),
            proxy_host: self.proxy_host.clone(),
            proxy_port: self.proxy_port,
            proxy_username: self.proxy_username.clone(),
            proxy_password: self.proxy_password.clone(),
            remove_missing: self.remove_missing,
            validate_downloads: self.validate_downloads,
        }
    }

    /// Build the publish-side configuration from this row
    pub fn distributor_config(&self) -> DistributorConfig {
        let mut config = DistributorConfig::default();
        if let Some(dir) = &self.publish_dir {
            config.publish_dir = PathBuf::from(dir);
        }
        config.protected = self.protected;
        config
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            repo_id: row.get(1)?,
            feed: row.get(2)?,
            auto_publish: row.get(3)?,
            protected: row.get(4)?,
            remove_missing: row.get(5)?,
            validate_downloads: row.get(6)?,
            max_downloads: row.get::<_, Option<i64>>(7)?.map(|v| v as u32),
            max_speed: row.get::<_, Option<i64>>(8)?.map(|v| v as u64),
            ssl_validation: row.get(9)?,
            ssl_ca_cert: row.get(10)?,
            ssl_client_cert: row.get(11)?,
            ssl_client_key: row.get(12)?,
            proxy_host: row.get(13)?,
            proxy_port: row.get(14)?,
            proxy_username: row.get(15)?,
            proxy_password: row.get(16)?,
            publish_dir: row.get(17)?,
            last_sync: row.get(18)?,
        })
    }
}

/// A repository/unit association
#[derive(Debug, Clone)]
pub struct Association {
    pub id: Option<i64>,
    pub repo_id: String,
    pub checksum: String,
}

impl Association {
    /// Associate a unit with a repository; a no-op if already associated
    pub fn insert(conn: &Connection, repo_id: &str, checksum: &str) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO associations (repo_id, checksum) VALUES (?1, ?2)",
            params![repo_id, checksum],
        )?;
        Ok(())
    }

    /// Remove an association
    pub fn delete(conn: &Connection, repo_id: &str, checksum: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM associations WHERE repo_id = ?1 AND checksum = ?2",
            params![repo_id, checksum],
        )?;
        Ok(())
    }

    /// Checksums associated with a repository, in association order
    pub fn checksums_for_repo(conn: &Connection, repo_id: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT checksum FROM associations WHERE repo_id = ?1 ORDER BY id",
        )?;

        let checksums = stmt
            .query_map([repo_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(checksums)
    }

    /// Check whether a unit is associated with a repository
    pub fn exists(conn: &Connection, repo_id: &str, checksum: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM associations WHERE repo_id = ?1 AND checksum = ?2",
            params![repo_id, checksum],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
