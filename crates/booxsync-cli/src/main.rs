//! booxsync CLI - drive the e-reader sync engine from a terminal
//!
//! Signs in, reconciles the local library with the backend, follows realtime
//! changes and asks AI profiles about passages.

mod cli;
mod commands;
mod config_profiles;
mod error;
mod token_store;

use clap::Parser;

use crate::cli::{Cli, Commands, LibraryCommands, SyncCommands};
use crate::commands::ask::run_ask;
use crate::commands::auth_cmd::run_auth;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::library::run_library_list;
use crate::commands::open::run_open;
use crate::commands::sync::{run_sync, run_sync_conflicts, SyncMode};
use crate::commands::watch::run_watch;
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "booxsync=info,booxsync_core=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();
    let db_path = cli.db_path.as_deref();

    match cli.command {
        Commands::Config { command } => run_config(command, profile)?,
        Commands::Auth { command } => run_auth(command, profile, db_path).await?,
        Commands::Sync { command } => match command {
            None => run_sync(SyncMode::Full, profile, db_path).await?,
            Some(SyncCommands::Pull) => run_sync(SyncMode::PullOnly, profile, db_path).await?,
            Some(SyncCommands::Push) => run_sync(SyncMode::PushOnly, profile, db_path).await?,
            Some(SyncCommands::Conflicts { limit, json }) => {
                run_sync_conflicts(limit, json, profile, db_path).await?;
            }
        },
        Commands::Library { command } => match command {
            LibraryCommands::List { json } => run_library_list(json, profile, db_path).await?,
        },
        Commands::Open { book_key } => run_open(&book_key, profile, db_path).await?,
        Commands::Watch => run_watch(profile, db_path).await?,
        Commands::Ask {
            ai_profile,
            book,
            text,
        } => {
            run_ask(
                &text,
                ai_profile.as_deref(),
                book.as_deref(),
                profile,
                db_path,
            )
            .await?;
        }
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
    }

    Ok(())
}
