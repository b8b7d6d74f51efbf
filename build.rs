// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: database path
fn db_path_arg() -> Arg {
    Arg::new("db_path")
        .short('d')
        .long("db-path")
        .value_name("PATH")
        .default_value("/var/lib/mirage/mirage.db")
        .help("Database path")
}

fn build_cli() -> Command {
    Command::new("mirage")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Mirage Contributors")
        .about("Mirror machine-image repositories with reconciliation-based sync")
        .subcommand_required(false)
        .subcommand(
            Command::new("init")
                .about("Initialize the mirage database")
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("repo")
                .about("Manage the repository registry")
                .subcommand(
                    Command::new("create")
                        .about("Register a new repository")
                        .arg(Arg::new("repo_id").required(true).help("Repository identifier"))
                        .arg(
                            Arg::new("feed")
                                .long("feed")
                                .required(true)
                                .help("Remote feed URL hosting the manifest and image blobs"),
                        )
                        .arg(
                            Arg::new("auto_publish")
                                .long("auto-publish")
                                .action(clap::ArgAction::SetTrue)
                                .help("Automatically publish after each successful sync"),
                        )
                        .arg(
                            Arg::new("protected")
                                .long("protected")
                                .action(clap::ArgAction::SetTrue)
                                .help("Require an entitlement certificate for served content"),
                        )
                        .arg(
                            Arg::new("remove_missing")
                                .long("remove-missing")
                                .action(clap::ArgAction::SetTrue)
                                .help("Prune images no longer advertised by the feed"),
                        )
                        .arg(
                            Arg::new("validate")
                                .long("validate")
                                .action(clap::ArgAction::SetTrue)
                                .help("Validate checksum and size of every downloaded image"),
                        )
                        .arg(db_path_arg()),
                )
                .subcommand(
                    Command::new("update")
                        .about("Update settings of a registered repository")
                        .arg(Arg::new("repo_id").required(true).help("Repository identifier"))
                        .arg(db_path_arg()),
                )
                .subcommand(
                    Command::new("list")
                        .about("List registered repositories")
                        .arg(db_path_arg()),
                )
                .subcommand(
                    Command::new("delete")
                        .about("Delete a repository and its associations")
                        .arg(Arg::new("repo_id").required(true).help("Repository identifier"))
                        .arg(db_path_arg()),
                ),
        )
        .subcommand(
            Command::new("sync")
                .about("Synchronize a repository from its feed")
                .arg(Arg::new("repo_id").required(true).help("Repository identifier"))
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("publish")
                .about("Publish a repository's images as a web tree")
                .arg(Arg::new("repo_id").required(true).help("Repository identifier"))
                .arg(Arg::new("dir").long("dir").help("Publish root directory"))
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("images")
                .about("List images associated with a repository")
                .arg(Arg::new("repo_id").required(true).help("Repository identifier"))
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("copy")
                .about("Associate one repository's images with another")
                .arg(Arg::new("source_repo").required(true).help("Source repository"))
                .arg(Arg::new("dest_repo").required(true).help("Destination repository"))
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove an image association from a repository")
                .arg(Arg::new("repo_id").required(true).help("Repository identifier"))
                .arg(Arg::new("checksum").required(true).help("Image checksum"))
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("upload")
                .about("Add an image to a repository from a local file")
                .arg(Arg::new("repo_id").required(true).help("Repository identifier"))
                .arg(Arg::new("file").required(true).help("Path to the image file"))
                .arg(Arg::new("name").long("name").required(true).help("Image name"))
                .arg(db_path_arg()),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("mirage.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
        return;
    }

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
