// src/main.rs

use anyhow::Result;
use clap::Parser;
use mirage::cli::{Cli, Commands, RepoCommands};
use mirage::commands;

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { db_path }) => commands::cmd_init(&db_path),
        Some(Commands::Repo { command }) => match command {
            RepoCommands::Create(args) => commands::cmd_repo_create(&args),
            RepoCommands::Update(args) => commands::cmd_repo_update(&args),
            RepoCommands::List { db_path } => commands::cmd_repo_list(&db_path),
            RepoCommands::Delete { repo_id, db_path } => {
                commands::cmd_repo_delete(&repo_id, &db_path)
            }
        },
        Some(Commands::Sync { repo_id, db_path }) => commands::cmd_sync(&repo_id, &db_path),
        Some(Commands::Publish {
            repo_id,
            dir,
            db_path,
        }) => commands::cmd_publish(&repo_id, dir.as_deref(), &db_path),
        Some(Commands::Images { repo_id, db_path }) => commands::cmd_images(&repo_id, &db_path),
        Some(Commands::Copy {
            source_repo,
            dest_repo,
            db_path,
        }) => commands::cmd_copy(&source_repo, &dest_repo, &db_path),
        Some(Commands::Remove {
            repo_id,
            checksum,
            db_path,
        }) => commands::cmd_remove(&repo_id, &checksum, &db_path),
        Some(Commands::Upload(args)) => commands::cmd_upload(&args),
        Some(Commands::Completions { shell }) => commands::cmd_completions(shell),
        None => {
            // No command provided, show help
            println!("Mirage v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'mirage --help' for usage information");
            Ok(())
        }
    }
}
