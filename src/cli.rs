// src/cli.rs
//! CLI definitions for mirage
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// Default location of the mirage database
pub const DEFAULT_DB_PATH: &str = "/var/lib/mirage/mirage.db";

#[derive(Parser)]
#[command(name = "mirage")]
#[command(author = "Mirage Project")]
#[command(version)]
#[command(about = "Mirror machine-image repositories with reconciliation-based sync", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the mirage database
    Init {
        /// Path to the database file
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },

    /// Manage the repository registry
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Synchronize a repository from its feed
    Sync {
        /// Repository identifier
        repo_id: String,

        /// Path to the database file
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },

    /// Publish a repository's images as a web tree
    Publish {
        /// Repository identifier
        repo_id: String,

        /// Publish root directory (overrides the repository setting)
        #[arg(long)]
        dir: Option<String>,

        /// Path to the database file
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },

    /// List images associated with a repository
    Images {
        /// Repository identifier
        repo_id: String,

        /// Path to the database file
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },

    /// Associate one repository's images with another (no download)
    Copy {
        /// Source repository identifier
        source_repo: String,

        /// Destination repository identifier
        dest_repo: String,

        /// Path to the database file
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },

    /// Remove an image association from a repository
    Remove {
        /// Repository identifier
        repo_id: String,

        /// Checksum of the image to remove
        checksum: String,

        /// Path to the database file
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },

    /// Add an image to a repository from a local file
    Upload(UploadArgs),

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum RepoCommands {
    /// Register a new repository
    Create(CreateRepoArgs),

    /// Update settings of a registered repository
    Update(UpdateRepoArgs),

    /// List registered repositories
    List {
        /// Path to the database file
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },

    /// Delete a repository and its associations
    Delete {
        /// Repository identifier
        repo_id: String,

        /// Path to the database file
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
}

#[derive(Args)]
pub struct CreateRepoArgs {
    /// Repository identifier
    pub repo_id: String,

    /// Remote feed URL hosting the manifest and image blobs
    #[arg(long)]
    pub feed: String,

    /// Automatically publish after each successful sync
    #[arg(long)]
    pub auto_publish: bool,

    /// Require an entitlement certificate for served content
    #[arg(long)]
    pub protected: bool,

    /// Prune images no longer advertised by the feed
    #[arg(long)]
    pub remove_missing: bool,

    /// Validate checksum and size of every downloaded image
    #[arg(long)]
    pub validate: bool,

    /// Maximum concurrent downloads
    #[arg(long)]
    pub max_downloads: Option<u32>,

    /// Transfer rate cap in bytes per second
    #[arg(long)]
    pub max_speed: Option<u64>,

    /// CA certificate bundle for the feed (PEM path)
    #[arg(long)]
    pub ssl_ca_cert: Option<String>,

    /// Client certificate for the feed (PEM path)
    #[arg(long)]
    pub ssl_client_cert: Option<String>,

    /// Client key for the feed (PEM path)
    #[arg(long)]
    pub ssl_client_key: Option<String>,

    /// Disable TLS certificate validation for the feed
    #[arg(long)]
    pub no_ssl_validation: bool,

    /// Proxy host for feed downloads
    #[arg(long)]
    pub proxy_host: Option<String>,

    /// Proxy port
    #[arg(long)]
    pub proxy_port: Option<u16>,

    /// Proxy username
    #[arg(long)]
    pub proxy_username: Option<String>,

    /// Proxy password
    #[arg(long)]
    pub proxy_password: Option<String>,

    /// Publish root directory for this repository
    #[arg(long)]
    pub publish_dir: Option<String>,

    /// Path to the database file
    #[arg(short, long, default_value = DEFAULT_DB_PATH)]
    pub db_path: String,
}

#[derive(Args)]
pub struct UpdateRepoArgs {
    /// Repository identifier
    pub repo_id: String,

    /// Remote feed URL hosting the manifest and image blobs
    #[arg(long)]
    pub feed: Option<String>,

    /// Automatically publish after each successful sync ("true"/"false")
    #[arg(long)]
    pub auto_publish: Option<String>,

    /// Require an entitlement certificate ("true"/"false")
    #[arg(long)]
    pub protected: Option<String>,

    /// Prune images no longer advertised ("true"/"false")
    #[arg(long)]
    pub remove_missing: Option<String>,

    /// Validate downloaded images ("true"/"false")
    #[arg(long)]
    pub validate: Option<String>,

    /// Maximum concurrent downloads
    #[arg(long)]
    pub max_downloads: Option<u32>,

    /// Transfer rate cap in bytes per second
    #[arg(long)]
    pub max_speed: Option<u64>,

    /// Publish root directory for this repository
    #[arg(long)]
    pub publish_dir: Option<String>,

    /// Path to the database file
    #[arg(short, long, default_value = DEFAULT_DB_PATH)]
    pub db_path: String,
}

#[derive(Args)]
pub struct UploadArgs {
    /// Repository identifier
    pub repo_id: String,

    /// Path to the image file
    pub file: String,

    /// Image name
    #[arg(long)]
    pub name: String,

    /// Disk format of the image
    #[arg(long, default_value = "qcow2")]
    pub disk_format: String,

    /// Container format of the image
    #[arg(long, default_value = "bare")]
    pub container_format: String,

    /// Minimum disk size in gigabytes
    #[arg(long, default_value_t = 0)]
    pub min_disk: i64,

    /// Minimum RAM in megabytes
    #[arg(long, default_value_t = 0)]
    pub min_ram: i64,

    /// Path to the database file
    #[arg(short, long, default_value = DEFAULT_DB_PATH)]
    pub db_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_repo_create_flags() {
        let cli = Cli::try_parse_from([
            "mirage",
            "repo",
            "create",
            "cirros",
            "--feed",
            "http://images.example.com/feed",
            "--auto-publish",
            "--remove-missing",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Repo {
                command: RepoCommands::Create(args),
            }) => {
                assert_eq!(args.repo_id, "cirros");
                assert!(args.auto_publish);
                assert!(args.remove_missing);
                assert!(!args.protected);
                assert_eq!(args.max_downloads, None);
            }
            _ => panic!("expected repo create"),
        }
    }

    #[test]
    fn test_sync_defaults_db_path() {
        let cli = Cli::try_parse_from(["mirage", "sync", "cirros"]).unwrap();
        match cli.command {
            Some(Commands::Sync { repo_id, db_path }) => {
                assert_eq!(repo_id, "cirros");
                assert_eq!(db_path, DEFAULT_DB_PATH);
            }
            _ => panic!("expected sync"),
        }
    }
}
