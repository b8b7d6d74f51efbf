// src/commands.rs
//! Command implementations for the mirage CLI
//!
//! Handlers open the local store, call into the library, and render
//! results for the operator. The final sync report's state and failure
//! list are the sole channel for failure detail.

use crate::cli::{Cli, CreateRepoArgs, UpdateRepoArgs, UploadArgs};
use crate::config::parse_bool;
use crate::hash;
use crate::image::{attrs, ImageRecord, Metadata};
use crate::repository::{current_timestamp, ImageSyncRun, SyncProgressReport, SyncState, WebPublisher};
use crate::store::models::Repository;
use crate::store::{AssociationStore, ContentStore, LocalStore, IMAGE_TYPE_ID};
use anyhow::{anyhow, bail, Context, Result};
use clap::CommandFactory;
use clap_complete::Shell;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tracing::info;

/// Initialize the database
pub fn cmd_init(db_path: &str) -> Result<()> {
    info!("Initializing mirage database at: {}", db_path);
    LocalStore::open(db_path)?;
    println!("Database initialized successfully at: {}", db_path);
    Ok(())
}

/// Register a new repository
pub fn cmd_repo_create(args: &CreateRepoArgs) -> Result<()> {
    let store = LocalStore::open(&args.db_path)?;
    if Repository::find_by_repo_id(store.conn(), &args.repo_id)?.is_some() {
        bail!("repository '{}' already exists", args.repo_id);
    }

    let mut repo = Repository::new(args.repo_id.clone(), args.feed.clone());
    repo.auto_publish = args.auto_publish;
    repo.protected = args.protected;
    repo.remove_missing = args.remove_missing;
    repo.validate_downloads = args.validate;
    repo.max_downloads = args.max_downloads;
    repo.max_speed = args.max_speed;
    repo.ssl_ca_cert = args.ssl_ca_cert.clone();
    repo.ssl_client_cert = args.ssl_client_cert.clone();
    repo.ssl_client_key = args.ssl_client_key.clone();
    if args.no_ssl_validation {
        repo.ssl_validation = Some(false);
    }
    repo.proxy_host = args.proxy_host.clone();
    repo.proxy_port = args.proxy_port;
    repo.proxy_username = args.proxy_username.clone();
    repo.proxy_password = args.proxy_password.clone();
    repo.publish_dir = args.publish_dir.clone();

    // Reject bad settings before they are persisted
    repo.importer_config().validate()?;
    repo.distributor_config().validate()?;

    repo.insert(store.conn())?;
    println!("Created repository '{}'", args.repo_id);
    Ok(())
}

/// Update settings of a registered repository
pub fn cmd_repo_update(args: &UpdateRepoArgs) -> Result<()> {
    let store = LocalStore::open(&args.db_path)?;
    let mut repo = Repository::find_by_repo_id(store.conn(), &args.repo_id)?
        .ok_or_else(|| anyhow!("repository '{}' not found", args.repo_id))?;

    if let Some(feed) = &args.feed {
        repo.feed = feed.clone();
    }
    if let Some(value) = &args.auto_publish {
        repo.auto_publish = parse_bool("auto_publish", value)?;
    }
    if let Some(value) = &args.protected {
        repo.protected = parse_bool("protected", value)?;
    }
    if let Some(value) = &args.remove_missing {
        repo.remove_missing = parse_bool("remove_missing", value)?;
    }
    if let Some(value) = &args.validate {
        repo.validate_downloads = parse_bool("validate", value)?;
    }
    if let Some(max_downloads) = args.max_downloads {
        repo.max_downloads = Some(max_downloads);
    }
    if let Some(max_speed) = args.max_speed {
        repo.max_speed = Some(max_speed);
    }
    if let Some(publish_dir) = &args.publish_dir {
        repo.publish_dir = Some(publish_dir.clone());
    }

    repo.importer_config().validate()?;
    repo.distributor_config().validate()?;

    repo.update(store.conn())?;
    println!("Updated repository '{}'", args.repo_id);
    Ok(())
}

/// List registered repositories
pub fn cmd_repo_list(db_path: &str) -> Result<()> {
    let store = LocalStore::open(db_path)?;
    let repos = Repository::list_all(store.conn())?;

    if repos.is_empty() {
        println!("No repositories registered");
        return Ok(());
    }

    for repo in repos {
        let mut flags = Vec::new();
        if repo.auto_publish {
            flags.push("auto-publish");
        }
        if repo.protected {
            flags.push("protected");
        }
        if repo.remove_missing {
            flags.push("remove-missing");
        }
        if repo.validate_downloads {
            flags.push("validate");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("{} <- {}{}", repo.repo_id, repo.feed, flags);
        if let Some(last_sync) = &repo.last_sync {
            println!("    last sync: {}", last_sync);
        }
    }
    Ok(())
}

/// Delete a repository and its associations
pub fn cmd_repo_delete(repo_id: &str, db_path: &str) -> Result<()> {
    let store = LocalStore::open(db_path)?;
    if Repository::find_by_repo_id(store.conn(), repo_id)?.is_none() {
        bail!("repository '{}' not found", repo_id);
    }
    Repository::delete(store.conn(), repo_id)?;
    println!("Deleted repository '{}'", repo_id);
    Ok(())
}

/// Aggregate progress bar fed from sync report snapshots
struct SyncProgressBar {
    bar: ProgressBar,
}

impl SyncProgressBar {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
                .expect("Invalid progress bar template")
                .progress_chars("#>-"),
        );
        Self { bar }
    }

    fn update(&self, report: &SyncProgressReport) {
        if report.state == SyncState::FilesInProgress {
            self.bar.set_length(report.total_bytes);
            self.bar.set_position(report.finished_bytes);
            self.bar.set_message(format!(
                "{}/{} images",
                report.num_files_finished, report.num_files
            ));
        }
    }

    fn finish(&self, report: &SyncProgressReport) {
        match report.state {
            SyncState::Complete => self.bar.finish_with_message(format!(
                "{}/{} images [done]",
                report.num_files_finished, report.num_files
            )),
            state => self.bar.abandon_with_message(format!("sync {}", state)),
        }
    }
}

/// Synchronize a repository from its feed
pub fn cmd_sync(repo_id: &str, db_path: &str) -> Result<()> {
    let store = LocalStore::open(db_path)?;
    let mut repo = Repository::find_by_repo_id(store.conn(), repo_id)?
        .ok_or_else(|| anyhow!("repository '{}' not found", repo_id))?;
    let config = repo.importer_config();

    println!("Syncing repository '{}' from {}", repo.repo_id, repo.feed);
    let progress = SyncProgressBar::new();
    let report = ImageSyncRun::new(&repo.repo_id, &config, &store, &store)?
        .with_listener(Box::new(|snapshot| progress.update(snapshot)))
        .perform_sync()?;
    progress.finish(&report);

    match report.state {
        SyncState::ManifestFailed => {
            let message = report
                .error_message
                .unwrap_or_else(|| "manifest retrieval failed".to_string());
            bail!("sync of '{}' failed: {}", repo.repo_id, message);
        }
        SyncState::Cancelled => {
            println!("Sync of '{}' was cancelled", repo.repo_id);
            return Ok(());
        }
        SyncState::FilesFailed => {
            println!(
                "Synchronized {} of {} images ({} failed):",
                report.num_files_finished,
                report.num_files,
                report.failed_images.len()
            );
            for failure in &report.failed_images {
                println!("  [FAILED] {} ({}): {}", failure.filename, failure.checksum, failure.error);
            }
        }
        _ => {
            println!(
                "Synchronized {} images ({} bytes)",
                report.num_files_finished, report.finished_bytes
            );
        }
    }

    repo.last_sync = Some(current_timestamp());
    repo.update(store.conn())?;

    if repo.auto_publish && report.state == SyncState::Complete {
        let publish_config = repo.distributor_config();
        let publish_report =
            WebPublisher::new(&repo.repo_id, &publish_config, &store)?.publish()?;
        println!(
            "Published {} images to {}",
            publish_report.images_published,
            publish_report.web_dir.display()
        );
    }

    Ok(())
}

/// Publish a repository's images as a web tree
pub fn cmd_publish(repo_id: &str, dir: Option<&str>, db_path: &str) -> Result<()> {
    let store = LocalStore::open(db_path)?;
    let repo = Repository::find_by_repo_id(store.conn(), repo_id)?
        .ok_or_else(|| anyhow!("repository '{}' not found", repo_id))?;

    let mut config = repo.distributor_config();
    if let Some(dir) = dir {
        config.publish_dir = dir.into();
    }

    let report = WebPublisher::new(&repo.repo_id, &config, &store)?.publish()?;
    println!(
        "Published {} images to {}",
        report.images_published,
        report.web_dir.display()
    );
    Ok(())
}

/// List images associated with a repository
pub fn cmd_images(repo_id: &str, db_path: &str) -> Result<()> {
    let store = LocalStore::open(db_path)?;
    if Repository::find_by_repo_id(store.conn(), repo_id)?.is_none() {
        bail!("repository '{}' not found", repo_id);
    }

    let units = store.associated_units(repo_id, IMAGE_TYPE_ID)?;
    if units.is_empty() {
        println!("No images in repository '{}'", repo_id);
        return Ok(());
    }

    println!("{} images in repository '{}':", units.len(), repo_id);
    for unit in units {
        let name = unit.metadata.get(attrs::NAME).unwrap_or(&unit.key);
        let size = unit.metadata.get(attrs::SIZE).unwrap_or("?");
        println!("  {} ({} bytes)", name, size);
        println!("      checksum: {}", unit.key);
    }
    Ok(())
}

/// Associate one repository's images with another, without downloading
pub fn cmd_copy(source_repo: &str, dest_repo: &str, db_path: &str) -> Result<()> {
    let store = LocalStore::open(db_path)?;
    for repo_id in [source_repo, dest_repo] {
        if Repository::find_by_repo_id(store.conn(), repo_id)?.is_none() {
            bail!("repository '{}' not found", repo_id);
        }
    }

    let units = store.associated_units(source_repo, IMAGE_TYPE_ID)?;
    for unit in &units {
        store.associate(dest_repo, &unit.key)?;
    }
    println!(
        "Copied {} images from '{}' to '{}'",
        units.len(),
        source_repo,
        dest_repo
    );
    Ok(())
}

/// Remove an image association from a repository
pub fn cmd_remove(repo_id: &str, checksum: &str, db_path: &str) -> Result<()> {
    let store = LocalStore::open(db_path)?;
    if Repository::find_by_repo_id(store.conn(), repo_id)?.is_none() {
        bail!("repository '{}' not found", repo_id);
    }

    store.unassociate(repo_id, checksum)?;
    println!("Removed image {} from repository '{}'", checksum, repo_id);
    Ok(())
}

/// Add an image to a repository from a local file
pub fn cmd_upload(args: &UploadArgs) -> Result<()> {
    let store = LocalStore::open(&args.db_path)?;
    if Repository::find_by_repo_id(store.conn(), &args.repo_id)?.is_none() {
        bail!("repository '{}' not found", args.repo_id);
    }

    let source = Path::new(&args.file);
    let filename = source
        .file_name()
        .ok_or_else(|| anyhow!("'{}' has no filename", args.file))?
        .to_string_lossy()
        .into_owned();
    let size = std::fs::metadata(source)
        .with_context(|| format!("cannot read '{}'", args.file))?
        .len();
    let checksum = hash::md5_file(source)
        .with_context(|| format!("cannot checksum '{}'", args.file))?;

    // Already stored anywhere: associate, never duplicate content
    if store.units_by_type(IMAGE_TYPE_ID)?.iter().any(|u| u.key == checksum) {
        store.associate(&args.repo_id, &checksum)?;
        println!(
            "Image {} already in the store; associated with '{}'",
            checksum, args.repo_id
        );
        return Ok(());
    }

    let mut metadata = Metadata::new();
    metadata.insert(attrs::CHECKSUM, checksum.as_str());
    metadata.insert(attrs::CONTAINER_FORMAT, args.container_format.as_str());
    metadata.insert(attrs::DISK_FORMAT, args.disk_format.as_str());
    metadata.insert(attrs::FILENAME, filename.as_str());
    metadata.insert(attrs::MIN_DISK, args.min_disk.to_string());
    metadata.insert(attrs::MIN_RAM, args.min_ram.to_string());
    metadata.insert(attrs::NAME, args.name.as_str());
    metadata.insert(attrs::SIZE, size.to_string());

    let mut record = ImageRecord::from_manifest_entry(checksum.clone(), metadata);
    record.register(&store)?;
    let storage_path = record
        .storage_path()
        .ok_or_else(|| anyhow!("no storage location for {}", checksum))?
        .to_path_buf();
    std::fs::copy(source, &storage_path)
        .with_context(|| format!("cannot stage '{}'", args.file))?;

    // A failed validation removes the staged file and reports the error
    if let Err(e) = record.validate() {
        let _ = std::fs::remove_file(&storage_path);
        return Err(e.into());
    }

    record.commit(&store)?;
    store.associate(&args.repo_id, &checksum)?;
    println!(
        "Uploaded '{}' to repository '{}' ({} bytes, checksum {})",
        args.name, args.repo_id, size, checksum
    );
    Ok(())
}

/// Generate shell completion scripts on stdout
pub fn cmd_completions(shell: Shell) -> Result<()> {
    let mut command = Cli::command();
    clap_complete::generate(shell, &mut command, "mirage", &mut std::io::stdout());
    Ok(())
}
