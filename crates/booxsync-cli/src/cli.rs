use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "booxsync")]
#[command(about = "Keep an e-reader library in sync from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name selecting backend and credentials
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Sign in or out of the backend
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Reconcile the local store with the backend (pull, then push)
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Inspect the local library
    Library {
        #[command(subcommand)]
        command: LibraryCommands,
    },
    /// Resolve a readable file for a book, downloading it if needed
    Open {
        /// Stable book key
        book_key: String,
    },
    /// Follow realtime changes until interrupted
    Watch,
    /// Ask an AI profile a question and store the answer as a note
    Ask {
        /// AI profile name (defaults to the active one)
        #[arg(long, value_name = "NAME")]
        ai_profile: Option<String>,
        /// Attach the note to this book
        #[arg(long, value_name = "KEY")]
        book: Option<String>,
        /// Question text
        text: Vec<String>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Pull every collection without pushing
    Pull,
    /// Push local changes without pulling
    Push,
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum LibraryCommands {
    /// List books in the local library
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Backend REST base URL
        #[arg(long, value_name = "URL")]
        backend_url: Option<String>,
        /// Realtime socket URL
        #[arg(long, value_name = "URL")]
        realtime_url: Option<String>,
        /// Realtime public API key
        #[arg(long, value_name = "KEY")]
        realtime_key: Option<String>,
        /// Directory for downloaded book files
        #[arg(long, value_name = "PATH")]
        library_dir: Option<PathBuf>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile
    Show,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign in with email/password and store tokens in the keychain
    Login {
        /// Account email
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Account password
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Show auth status for profile
    Status,
    /// Sign out, clearing tokens and all local data of the profile
    Logout,
}
