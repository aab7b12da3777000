use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] booxsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Not signed in. Run `booxsync auth login` first.")]
    NotSignedIn,
    #[error("Question text cannot be empty")]
    EmptyQuestion,
    #[error("No AI profile named '{0}'")]
    AiProfileNotFound(String),
    #[error("No AI profiles are configured. Run `booxsync sync` to fetch them.")]
    NoAiProfiles,
    #[error("The AI provider returned no answer")]
    NoAnswer,
    #[error(
        "Realtime is not configured. Run `booxsync config init --realtime-url <URL> --realtime-key <KEY>`."
    )]
    RealtimeNotConfigured,
}
