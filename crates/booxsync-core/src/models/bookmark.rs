//! Bookmark model

use serde::{Deserialize, Serialize};

use super::{LocalId, Locator, SyncMeta};

/// A bookmark inside a library item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Store-local identity
    pub local_id: LocalId,
    /// Library item stable key
    pub book_key: String,
    /// Position of the bookmark
    pub locator: Locator,
    /// Free-text highlight or label
    pub highlight: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Sync bookkeeping
    pub sync: SyncMeta,
}

impl Bookmark {
    /// Create a new local bookmark
    #[must_use]
    pub fn new(book_key: impl Into<String>, locator: Locator, highlight: Option<String>) -> Self {
        let now = crate::util::now_millis();
        Self {
            local_id: LocalId::new(),
            book_key: book_key.into(),
            locator,
            highlight: crate::util::normalize_text_option(highlight),
            created_at: now,
            sync: SyncMeta::new_local(now),
        }
    }
}
