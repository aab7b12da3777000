//! Shared database service wrapper used across clients.
//!
//! Local mutations made through this service are the authoritative write:
//! they advance the entity clock and mark it dirty so the next push picks it up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::auth::SessionUser;
use crate::db::{
    AccountRepository, BookmarkRepository, ConflictRepository, Database, LibSqlAccountRepository,
    LibSqlBookmarkRepository, LibSqlConflictRepository, LibSqlLibraryRepository,
    LibSqlNoteRepository, LibSqlPositionRepository, LibSqlProfileRepository,
    LibSqlSettingsRepository, LibraryRepository, NoteRepository, PositionRepository,
    ProfileRepository, SettingsRepository,
};
use crate::models::{
    next_clock, AiNote, AiProfile, Bookmark, FileRef, LibraryItem, LocalId, Locator,
    ReadingPosition, Settings, SyncConflict,
};
use crate::util::now_millis;
use crate::{Error, Result};

/// Thread-safe service for DB and repository operations.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh store is created.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local database at {} is unreadable: {}. Starting from an empty store.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Exclusive access to the store for multi-step operations.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().await
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        error
            .to_string()
            .to_ascii_lowercase()
            .contains("file is not a database")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = now_millis();
            let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
                return Ok(());
            };
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));
            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        for suffix in ["-wal", "-shm"] {
            let sidecar = parent.join(format!("{base_name}{suffix}"));
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
                tracing::warn!("Removed stale sidecar file {}", sidecar.display());
            }
        }
        Ok(())
    }

    // --- Account ---

    pub async fn load_account(&self) -> Result<Option<SessionUser>> {
        let db = self.db.lock().await;
        LibSqlAccountRepository::new(db.connection()).load().await
    }

    pub async fn save_account(&self, user: &SessionUser) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlAccountRepository::new(db.connection()).save(user).await
    }

    /// Wipe every per-user table.
    pub async fn clear_user_data(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.clear_user_data().await
    }

    // --- Library ---

    /// Live library items, most recently opened first.
    pub async fn list_library(&self) -> Result<Vec<LibraryItem>> {
        let db = self.db.lock().await;
        LibSqlLibraryRepository::new(db.connection()).list().await
    }

    pub async fn get_library_item(&self, book_key: &str) -> Result<Option<LibraryItem>> {
        let db = self.db.lock().await;
        LibSqlLibraryRepository::new(db.connection())
            .get(book_key)
            .await
    }

    /// Add a local file to the library, reviving a tombstoned entry with the same key.
    pub async fn import_book(
        &self,
        book_key: &str,
        title: Option<String>,
        path: PathBuf,
    ) -> Result<LibraryItem> {
        let book_key = book_key.trim();
        if book_key.is_empty() {
            return Err(Error::InvalidInput("Book key cannot be empty".to_string()));
        }
        let db = self.db.lock().await;
        let repo = LibSqlLibraryRepository::new(db.connection());
        let item = match repo.get(book_key).await? {
            Some(mut existing) => {
                let now = now_millis();
                existing.title = title.or(existing.title);
                existing.file = FileRef::Local(path);
                existing.last_opened_at = now;
                existing.deleted_at = None;
                existing.sync.deleted = false;
                existing.sync.touch(now);
                existing
            }
            None => LibraryItem::new_local(book_key, title, path),
        };
        repo.upsert(&item).await?;
        Ok(item)
    }

    /// Tombstone a library item.
    pub async fn delete_book(&self, book_key: &str) -> Result<LibraryItem> {
        let db = self.db.lock().await;
        let repo = LibSqlLibraryRepository::new(db.connection());
        let mut item = repo
            .get(book_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Book {book_key}")))?;
        let now = now_millis();
        item.deleted_at = Some(now);
        item.sync.mark_deleted(now);
        repo.upsert(&item).await?;
        Ok(item)
    }

    pub async fn set_completed(&self, book_key: &str, completed: bool) -> Result<LibraryItem> {
        let db = self.db.lock().await;
        let repo = LibSqlLibraryRepository::new(db.connection());
        let mut item = repo
            .get(book_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Book {book_key}")))?;
        if item.completed != completed {
            item.completed = completed;
            item.sync.touch(now_millis());
            repo.upsert(&item).await?;
        }
        Ok(item)
    }

    // --- Reading positions ---

    /// Store a new locator snapshot and fold it into the library item.
    pub async fn record_position(&self, book_key: &str, locator: Locator) -> Result<ReadingPosition> {
        let db = self.db.lock().await;
        let positions = LibSqlPositionRepository::new(db.connection());
        let previous = positions.get(book_key).await?;
        let now = previous
            .as_ref()
            .map_or_else(now_millis, |previous| next_clock(previous.updated_at, now_millis()));
        let mut position = ReadingPosition::new(book_key, locator, now);
        if let Some(previous) = previous {
            position.local_id = previous.local_id;
            position.remote_id = previous.remote_id;
        }
        positions.upsert(&position).await?;

        let library = LibSqlLibraryRepository::new(db.connection());
        if let Some(mut item) = library.get(book_key).await? {
            if item.apply_position(&position) {
                library.upsert(&item).await?;
            }
        }
        Ok(position)
    }

    pub async fn get_position(&self, book_key: &str) -> Result<Option<ReadingPosition>> {
        let db = self.db.lock().await;
        LibSqlPositionRepository::new(db.connection())
            .get(book_key)
            .await
    }

    // --- Bookmarks ---

    pub async fn add_bookmark(
        &self,
        book_key: &str,
        locator: Locator,
        highlight: Option<String>,
    ) -> Result<Bookmark> {
        let bookmark = Bookmark::new(
            book_key,
            locator,
            crate::util::normalize_text_option(highlight),
        );
        let db = self.db.lock().await;
        LibSqlBookmarkRepository::new(db.connection())
            .upsert(&bookmark)
            .await?;
        Ok(bookmark)
    }

    /// Tombstone a bookmark.
    pub async fn delete_bookmark(&self, id: &LocalId) -> Result<Bookmark> {
        let db = self.db.lock().await;
        let repo = LibSqlBookmarkRepository::new(db.connection());
        let mut bookmark = repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Bookmark {id}")))?;
        bookmark.sync.mark_deleted(now_millis());
        repo.upsert(&bookmark).await?;
        Ok(bookmark)
    }

    pub async fn get_bookmark(&self, id: &LocalId) -> Result<Option<Bookmark>> {
        let db = self.db.lock().await;
        LibSqlBookmarkRepository::new(db.connection()).get(id).await
    }

    pub async fn list_bookmarks(&self, book_key: &str) -> Result<Vec<Bookmark>> {
        let db = self.db.lock().await;
        LibSqlBookmarkRepository::new(db.connection())
            .list_for_book(book_key)
            .await
    }

    // --- AI notes ---

    /// Persist a local edit of a note.
    pub async fn save_note(&self, note: &AiNote) -> Result<AiNote> {
        let mut note = note.clone();
        note.sync.touch(now_millis());
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection())
            .upsert(&note)
            .await?;
        Ok(note)
    }

    /// Tombstone a note. Notes never pushed are removed outright.
    pub async fn delete_note(&self, id: &LocalId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlNoteRepository::new(db.connection());
        let Some(mut note) = repo.get(id).await? else {
            return Ok(());
        };
        if note.sync.remote_id.is_none() {
            return repo.delete(id).await;
        }
        note.sync.mark_deleted(now_millis());
        repo.upsert(&note).await
    }

    pub async fn get_note(&self, id: &LocalId) -> Result<Option<AiNote>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection()).get(id).await
    }

    pub async fn list_notes(&self, book_key: Option<&str>, limit: usize) -> Result<Vec<AiNote>> {
        let db = self.db.lock().await;
        LibSqlNoteRepository::new(db.connection())
            .list(book_key, limit)
            .await
    }

    // --- AI profiles ---

    pub async fn save_profile(&self, profile: &AiProfile) -> Result<AiProfile> {
        if profile.name.trim().is_empty() {
            return Err(Error::InvalidInput("Profile name cannot be empty".to_string()));
        }
        let mut profile = profile.clone();
        profile.sync.touch(now_millis());
        let db = self.db.lock().await;
        LibSqlProfileRepository::new(db.connection())
            .upsert(&profile)
            .await?;
        Ok(profile)
    }

    pub async fn delete_profile(&self, id: &LocalId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlProfileRepository::new(db.connection());
        let Some(mut profile) = repo.get(id).await? else {
            return Ok(());
        };
        if profile.sync.remote_id.is_none() {
            return repo.delete(id).await;
        }
        profile.sync.mark_deleted(now_millis());
        repo.upsert(&profile).await
    }

    pub async fn list_profiles(&self) -> Result<Vec<AiProfile>> {
        let db = self.db.lock().await;
        LibSqlProfileRepository::new(db.connection()).list().await
    }

    /// Best live profile with the given name, preferring one with a usable key.
    pub async fn find_profile(&self, name: &str) -> Result<Option<AiProfile>> {
        let db = self.db.lock().await;
        let candidates = LibSqlProfileRepository::new(db.connection())
            .find_by_name(name)
            .await?;
        Ok(candidates.into_iter().reduce(|best, next| {
            if crate::gateway::prefer_local_profile(&next, &best) {
                next
            } else {
                best
            }
        }))
    }

    // --- Settings ---

    pub async fn load_settings(&self) -> Result<Settings> {
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection()).load().await
    }

    /// Persist a local edit of the reader settings.
    pub async fn save_settings(&self, settings: &Settings) -> Result<Settings> {
        let mut settings = settings.clone();
        settings.sync.touch(now_millis());
        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .save(&settings)
            .await?;
        Ok(settings)
    }

    // --- Maintenance ---

    /// Remove tombstones the backend has acknowledged. Returns the row count.
    pub async fn purge_synced_tombstones(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let mut purged = LibSqlLibraryRepository::new(conn)
            .purge_synced_tombstones()
            .await?;
        purged += LibSqlBookmarkRepository::new(conn)
            .purge_synced_tombstones()
            .await?;
        purged += LibSqlNoteRepository::new(conn)
            .purge_synced_tombstones()
            .await?;
        purged += LibSqlProfileRepository::new(conn)
            .purge_synced_tombstones()
            .await?;
        Ok(purged)
    }

    // --- Diagnostics ---

    /// List recently resolved sync conflicts.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list(limit)
            .await
    }
}
