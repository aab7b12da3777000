//! Data models for booxsync

mod ai_note;
mod ai_profile;
mod bookmark;
mod library_item;
mod locator;
mod settings;
mod sync_conflict;
mod sync_meta;

pub use ai_note::{AiNote, ChatRole, ChatTurn, NoteStatus};
pub use ai_profile::AiProfile;
pub use bookmark::Bookmark;
pub use library_item::{FileRef, LibraryItem, ReadingPosition};
pub use locator::Locator;
pub use settings::{ContrastMode, Settings};
pub use sync_conflict::{ConflictWinner, SyncConflict};
pub use sync_meta::{next_clock, LocalId, SyncMeta};
