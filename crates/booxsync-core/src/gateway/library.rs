//! Library items and their book files.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use super::records::{self, RemoteBook, BOOKS};
use super::rest::{key_filter, user_filter};
use super::{
    decide, decode, LocalClock, MergeDecision, PullReport, PushOutcome, PushReport, PushRequest,
    SyncGateway,
};
use crate::db::{LibSqlLibraryRepository, LibraryRepository};
use crate::models::{ConflictWinner, FileRef, LibraryItem, LocalId, SyncMeta};
use crate::storage::RemoteFileState;
use crate::{Error, Result};

impl SyncGateway {
    /// Push one library item, uploading its file when the backend lacks it.
    pub async fn push_book(&self, book_key: &str) -> Result<PushOutcome> {
        let user_id = self.user_id().await?;
        let item = self
            .db
            .get_library_item(book_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Book {book_key}")))?;

        let request = PushRequest {
            collection: BOOKS,
            record_key: &item.book_key,
            remote_id: item.sync.remote_id.as_deref(),
            key_filter: Some(key_filter(&user_id, "bookId", &item.book_key)),
            updated_at: item.sync.updated_at,
            deleted: item.sync.deleted,
            payload: records::book_payload(&user_id, &item),
        };
        let (outcome, remote) = self.push_record(request).await?;

        {
            let db = self.db.lock().await;
            let repo = LibSqlLibraryRepository::new(db.connection());
            repo.mark_synced(&item.book_key, outcome.remote_id(), item.sync.updated_at)
                .await?;
            if let PushOutcome::RemoteDeleted { deleted_at, .. } = &outcome {
                repo.apply_remote_tombstone(&item.book_key, *deleted_at).await?;
            }
        }

        if outcome.wrote() && !item.sync.deleted {
            if let Some(path) = item.file.local_path() {
                self.upload_if_missing(outcome.remote_id(), &remote, path)
                    .await?;
            }
        }
        Ok(outcome)
    }

    async fn upload_if_missing(&self, remote_id: &str, remote: &Value, path: &Path) -> Result<()> {
        let storage_path = remote
            .get("storagePath")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|path| !path.is_empty());
        if let Some(storage_path) = storage_path {
            if self.storage.probe(storage_path).await? != RemoteFileState::Missing {
                return Ok(());
            }
            tracing::info!("Remote file {} is missing, re-uploading", storage_path);
        }

        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Book file {} no longer exists, skipping upload", path.display());
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };
        let uploaded = self.storage.upload(remote_id, &content).await?;
        self.rest
            .update(
                BOOKS,
                remote_id,
                &json!({ "storagePath": uploaded.storage_path }),
            )
            .await?;
        tracing::info!("Uploaded book file as {}", uploaded.storage_path);
        Ok(())
    }

    /// Push every library item with local changes.
    pub async fn push_pending_books(&self) -> Result<PushReport> {
        let pending = {
            let db = self.db.lock().await;
            LibSqlLibraryRepository::new(db.connection())
                .list_unsynced()
                .await?
        };
        let mut report = PushReport::default();
        for item in pending {
            let result = self.push_book(&item.book_key).await;
            report.tally(BOOKS, &item.book_key, result)?;
        }
        Ok(report)
    }

    pub async fn pull_books(&self) -> Result<PullReport> {
        let user_id = self.user_id().await?;
        let remote = self.rest.list(BOOKS, &user_filter(&user_id)).await?;
        let mut report = PullReport::default();
        for record in remote {
            if let Some(book) = decode::<RemoteBook>(BOOKS, record, &mut report) {
                self.merge_book(book, &mut report).await?;
            }
        }
        tracing::info!(
            "Pulled books: {} updated, {} ignored, {} skipped",
            report.updated,
            report.ignored,
            report.skipped
        );
        Ok(report)
    }

    /// Pull the single library item with `book_key`.
    pub async fn pull_book(&self, book_key: &str) -> Result<PullReport> {
        let user_id = self.user_id().await?;
        let mut report = PullReport::default();
        let filter = key_filter(&user_id, "bookId", book_key);
        if let Some(record) = self.rest.find_one(BOOKS, &filter).await? {
            if let Some(book) = decode::<RemoteBook>(BOOKS, record, &mut report) {
                self.merge_book(book, &mut report).await?;
            }
        }
        Ok(report)
    }

    async fn merge_book(&self, remote: RemoteBook, report: &mut PullReport) -> Result<()> {
        let book_key = remote.book_id.trim().to_string();
        if book_key.is_empty() {
            tracing::warn!("Skipping book record {} without a key", remote.id);
            report.skipped += 1;
            return Ok(());
        }

        let db = self.db.lock().await;
        let repo = LibSqlLibraryRepository::new(db.connection());
        let local = repo.get(&book_key).await?;
        let decision = decide(
            local
                .as_ref()
                .map(|item| LocalClock::new(item.sync.updated_at, item.sync.deleted)),
            remote.updated_at,
            remote.deleted,
        );
        tracing::debug!("Book {}: {:?}", book_key, decision);

        match decision {
            MergeDecision::Insert => {
                repo.upsert(&remote_item(&remote, &book_key, None)).await?;
            }
            MergeDecision::ApplyRemote => {
                repo.upsert(&remote_item(&remote, &book_key, local.as_ref()))
                    .await?;
            }
            MergeDecision::ApplyTombstone => {
                repo.apply_remote_tombstone(&book_key, remote.deleted_at.unwrap_or(remote.updated_at))
                    .await?;
            }
            MergeDecision::KeepLocal => {
                drop(db);
                if let Some(local) = &local {
                    self.record_conflict(
                        BOOKS,
                        &book_key,
                        local.sync.updated_at,
                        remote.updated_at,
                        ConflictWinner::Local,
                    )
                    .await;
                }
            }
            MergeDecision::Unchanged => {
                if local.as_ref().is_some_and(|item| item.sync.remote_id.is_none()) {
                    repo.mark_synced(&book_key, &remote.id, remote.updated_at)
                        .await?;
                }
            }
        }
        report.count(decision);
        Ok(())
    }

    /// Tombstone `book_key` after the backend announced its deletion.
    ///
    /// Returns false when the item is unknown or already deleted.
    pub async fn apply_book_tombstone(&self, book_key: &str, deleted_at: i64) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlLibraryRepository::new(db.connection());
        match repo.get(book_key).await? {
            Some(item) if !item.sync.deleted => {
                repo.apply_remote_tombstone(book_key, deleted_at).await?;
                tracing::debug!("Book {} deleted remotely", book_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Resolve a readable file for `book_key`, downloading it on first open.
    ///
    /// The download lands in the library sandbox under a temporary name and is
    /// renamed into place before the file reference is swapped.
    pub async fn ensure_book_file_available(&self, book_key: &str) -> Result<PathBuf> {
        let item = self
            .db
            .get_library_item(book_key)
            .await?
            .filter(|item| !item.sync.deleted)
            .ok_or_else(|| Error::NotFound(format!("Book {book_key}")))?;

        if let Some(path) = item.file.local_path() {
            if is_readable_file(path).await {
                return Ok(path.to_path_buf());
            }
            tracing::info!("Local file for {} is gone, fetching from backend", book_key);
        }

        let storage_path = match item.file.storage_path() {
            Some(path) => path.to_string(),
            None => self.lookup_storage_path(book_key).await?,
        };
        let path = self
            .storage
            .download_to(&storage_path, &self.library_dir)
            .await?;

        let db = self.db.lock().await;
        LibSqlLibraryRepository::new(db.connection())
            .set_file(book_key, &FileRef::Local(path.clone()))
            .await?;
        Ok(path)
    }

    async fn lookup_storage_path(&self, book_key: &str) -> Result<String> {
        let user_id = self.user_id().await?;
        let record = self
            .rest
            .find_one(BOOKS, &key_filter(&user_id, "bookId", book_key))
            .await?
            .ok_or_else(|| Error::NotFound(format!("No remote record for book {book_key}")))?;
        let remote: RemoteBook = serde_json::from_value(record)?;
        if remote.deleted {
            return Err(Error::NotFound(format!("Book {book_key} was deleted")));
        }
        remote
            .storage_path()
            .ok_or_else(|| Error::NotFound(format!("Book {book_key} has no uploaded file")))
    }
}

/// Library item carrying the remote fields, keeping device-local state from `local`.
fn remote_item(remote: &RemoteBook, book_key: &str, local: Option<&LibraryItem>) -> LibraryItem {
    let remote_file = remote
        .storage_path()
        .map_or(FileRef::Placeholder, FileRef::Remote);
    let file = match local.map(|item| &item.file) {
        Some(FileRef::Local(path)) => FileRef::Local(path.clone()),
        _ => remote_file,
    };
    LibraryItem {
        local_id: local.map_or_else(LocalId::new, |item| item.local_id.clone()),
        book_key: book_key.to_string(),
        title: remote
            .title
            .clone()
            .or_else(|| local.and_then(|item| item.title.clone())),
        file,
        file_hash: remote.file_hash.clone(),
        last_locator: local.and_then(|item| item.last_locator.clone()),
        last_opened_at: local.map_or(0, |item| item.last_opened_at),
        completed: remote.completed,
        deleted_at: None,
        sync: SyncMeta::from_remote(&remote.id, remote.updated_at, false),
    }
}

async fn is_readable_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file() && metadata.len() > 0)
}
