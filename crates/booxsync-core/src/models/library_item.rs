//! Library entries and their reading positions

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{LocalId, Locator, SyncMeta};

const REMOTE_SCHEME: &str = "remote://";
const FILE_SCHEME: &str = "file://";

/// Where the publication file for a library item lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileRef {
    /// File present in local storage
    Local(PathBuf),
    /// Uploaded object, addressed as `{recordId}/{fileName}`
    Remote(String),
    /// Metadata-only item with no known object yet
    Placeholder,
}

impl FileRef {
    /// Parse a stored file URI.
    pub fn parse(uri: &str) -> Self {
        let uri = uri.trim();
        if let Some(path) = uri.strip_prefix(REMOTE_SCHEME) {
            let path = path.trim_matches('/');
            if path.is_empty() {
                Self::Placeholder
            } else {
                Self::Remote(path.to_string())
            }
        } else if let Some(path) = uri.strip_prefix(FILE_SCHEME) {
            Self::Local(PathBuf::from(path))
        } else if uri.is_empty() {
            Self::Placeholder
        } else {
            Self::Local(PathBuf::from(uri))
        }
    }

    /// Render as the URI persisted in the local store.
    pub fn to_uri(&self) -> String {
        match self {
            Self::Local(path) => path.to_string_lossy().into_owned(),
            Self::Remote(storage_path) => format!("{REMOTE_SCHEME}{storage_path}"),
            Self::Placeholder => REMOTE_SCHEME.to_string(),
        }
    }

    /// Local path if the renderer can open this reference directly.
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Remote(_) | Self::Placeholder => None,
        }
    }

    pub fn storage_path(&self) -> Option<&str> {
        match self {
            Self::Remote(path) => Some(path),
            Self::Local(_) | Self::Placeholder => None,
        }
    }
}

/// A book in the user's library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryItem {
    /// Store-local identity
    pub local_id: LocalId,
    /// Content-derived key shared by every device
    pub book_key: String,
    /// Display title
    pub title: Option<String>,
    /// File reference
    pub file: FileRef,
    /// Hash of the uploaded file content
    pub file_hash: Option<String>,
    /// Last reading position
    pub last_locator: Option<Locator>,
    /// Last time the book was opened (Unix ms)
    pub last_opened_at: i64,
    /// Completion flag
    pub completed: bool,
    /// When the tombstone was set (Unix ms)
    pub deleted_at: Option<i64>,
    /// Sync bookkeeping
    pub sync: SyncMeta,
}

impl LibraryItem {
    /// Create a library item for a freshly imported local file.
    #[must_use]
    pub fn new_local(book_key: impl Into<String>, title: Option<String>, path: PathBuf) -> Self {
        let now = crate::util::now_millis();
        Self {
            local_id: LocalId::new(),
            book_key: book_key.into(),
            title,
            file: FileRef::Local(path),
            file_hash: None,
            last_locator: None,
            last_opened_at: now,
            completed: false,
            deleted_at: None,
            sync: SyncMeta::new_local(now),
        }
    }

    /// Fold a newer reading position into this item.
    ///
    /// Returns `false` when the position is not newer than what the item holds.
    pub fn apply_position(&mut self, position: &ReadingPosition) -> bool {
        if self.last_locator.is_some() && position.updated_at <= self.last_opened_at {
            return false;
        }
        self.last_locator = Some(position.locator.clone());
        self.last_opened_at = self.last_opened_at.max(position.updated_at);
        true
    }

    /// Title, falling back to the book key.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.book_key)
    }
}

/// Per-book locator snapshot published while reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingPosition {
    /// Store-local identity
    pub local_id: LocalId,
    /// Library item this position belongs to
    pub book_key: String,
    /// Locator at the time of the snapshot
    pub locator: Locator,
    /// Snapshot time (Unix ms)
    pub updated_at: i64,
    /// Backend id of the progress record
    pub remote_id: Option<String>,
    /// Whether the snapshot reached the backend
    pub is_synced: bool,
}

impl ReadingPosition {
    #[must_use]
    pub fn new(book_key: impl Into<String>, locator: Locator, updated_at: i64) -> Self {
        Self {
            local_id: LocalId::new(),
            book_key: book_key.into(),
            locator,
            updated_at,
            remote_id: None,
            is_synced: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator(href: &str) -> Locator {
        Locator::parse(format!(r#"{{"href":"{href}"}}"#)).unwrap()
    }

    #[test]
    fn file_ref_uri_roundtrip() {
        let local = FileRef::Local(PathBuf::from("/data/books/a.epub"));
        let remote = FileRef::Remote("rec1/abc.epub".to_string());
        for file in [local, remote, FileRef::Placeholder] {
            assert_eq!(FileRef::parse(&file.to_uri()), file);
        }
    }

    #[test]
    fn file_ref_accepts_file_scheme() {
        assert_eq!(
            FileRef::parse("file:///tmp/x.epub"),
            FileRef::Local(PathBuf::from("/tmp/x.epub"))
        );
        assert_eq!(FileRef::parse(""), FileRef::Placeholder);
    }

    #[test]
    fn only_local_refs_are_resolvable() {
        assert!(FileRef::Local(PathBuf::from("a")).local_path().is_some());
        assert!(FileRef::Remote("r/a".into()).local_path().is_none());
        assert!(FileRef::Placeholder.local_path().is_none());
    }

    #[test]
    fn apply_position_ignores_older_snapshots() {
        let mut item = LibraryItem::new_local("key", None, PathBuf::from("a.epub"));
        item.last_opened_at = 1_000;

        let newer = ReadingPosition::new("key", locator("ch2"), 2_000);
        assert!(item.apply_position(&newer));
        assert_eq!(item.last_opened_at, 2_000);

        let older = ReadingPosition::new("key", locator("ch1"), 1_500);
        assert!(!item.apply_position(&older));
        assert_eq!(item.last_locator.as_ref().map(Locator::href), Some("ch2"));
    }
}
