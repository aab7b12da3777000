//! Local store for booxsync
//!
//! Every repository borrows a connection from [`Database`]; nothing in this
//! module keeps global state, so tests hand repositories an in-memory store.

mod account_repository;
mod bookmark_repository;
mod conflict_repository;
mod connection;
mod library_repository;
mod migrations;
mod note_repository;
mod position_repository;
mod profile_repository;
mod settings_repository;

pub use account_repository::{AccountRepository, LibSqlAccountRepository};
pub use bookmark_repository::{BookmarkRepository, LibSqlBookmarkRepository};
pub use conflict_repository::{ConflictRepository, LibSqlConflictRepository};
pub use connection::Database;
pub use library_repository::{LibSqlLibraryRepository, LibraryRepository};
pub use note_repository::{LibSqlNoteRepository, NoteRepository};
pub use position_repository::{LibSqlPositionRepository, PositionRepository};
pub use profile_repository::{LibSqlProfileRepository, ProfileRepository};
pub use settings_repository::{LibSqlSettingsRepository, SettingsRepository};

use crate::models::LocalId;
use crate::{Error, Result};

/// SQLite has no boolean column type.
pub(crate) fn flag(value: bool) -> i64 {
    i64::from(value)
}

pub(crate) fn parse_local_id(value: &str) -> Result<LocalId> {
    value
        .parse()
        .map_err(|error| Error::Database(format!("invalid local id {value}: {error}")))
}

/// Parse a stored locator, dropping it with a warning when the text is invalid.
pub(crate) fn stored_locator(value: Option<String>) -> Option<crate::models::Locator> {
    match crate::models::Locator::parse_optional(value) {
        Ok(locator) => locator,
        Err(error) => {
            tracing::warn!("Ignoring unreadable stored locator: {}", error);
            None
        }
    }
}
