//! Library item repository

use crate::error::Result;
use crate::models::{FileRef, LibraryItem, SyncMeta};
use libsql::{Connection, Row};

use super::{flag, parse_local_id, stored_locator};

const SELECT_COLUMNS: &str = "SELECT local_id, book_key, title, file_uri, file_hash, last_locator,
    last_opened_at, completed, deleted_at, remote_id, updated_at, deleted, is_synced
    FROM library_items";

/// Trait for library storage operations (async)
#[allow(async_fn_in_trait)]
pub trait LibraryRepository {
    /// Fetch an item by stable key, tombstones included
    async fn get(&self, book_key: &str) -> Result<Option<LibraryItem>>;

    /// Live items, most recently opened first
    async fn list(&self) -> Result<Vec<LibraryItem>>;

    /// Items with local changes not yet pushed, tombstones included
    async fn list_unsynced(&self) -> Result<Vec<LibraryItem>>;

    /// Insert or overwrite an item keyed by `book_key`
    async fn upsert(&self, item: &LibraryItem) -> Result<()>;

    /// Record a confirmed push. Returns whether the item is now clean.
    async fn mark_synced(&self, book_key: &str, remote_id: &str, pushed_at: i64) -> Result<bool>;

    /// Apply a tombstone observed on the backend
    async fn apply_remote_tombstone(&self, book_key: &str, deleted_at: i64) -> Result<bool>;

    /// Swap the file reference without touching the mutation clock
    async fn set_file(&self, book_key: &str, file: &FileRef) -> Result<()>;

    /// Physically remove tombstones whose deletion reached the backend
    async fn purge_synced_tombstones(&self) -> Result<u64>;
}

/// libSQL implementation of `LibraryRepository`
pub struct LibSqlLibraryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlLibraryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_items(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<LibraryItem>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_item(&row)?);
        }
        Ok(items)
    }
}

fn row_to_item(row: &Row) -> Result<LibraryItem> {
    let local_id: String = row.get(0)?;
    let file_uri: String = row.get(3)?;
    Ok(LibraryItem {
        local_id: parse_local_id(&local_id)?,
        book_key: row.get(1)?,
        title: row.get(2)?,
        file: FileRef::parse(&file_uri),
        file_hash: row.get(4)?,
        last_locator: stored_locator(row.get(5)?),
        last_opened_at: row.get(6)?,
        completed: row.get::<i64>(7)? != 0,
        deleted_at: row.get(8)?,
        sync: SyncMeta {
            remote_id: row.get(9)?,
            updated_at: row.get(10)?,
            deleted: row.get::<i64>(11)? != 0,
            is_synced: row.get::<i64>(12)? != 0,
        },
    })
}

impl LibraryRepository for LibSqlLibraryRepository<'_> {
    async fn get(&self, book_key: &str) -> Result<Option<LibraryItem>> {
        let sql = format!("{SELECT_COLUMNS} WHERE book_key = ?1");
        Ok(self.query_items(&sql, [book_key]).await?.into_iter().next())
    }

    async fn list(&self) -> Result<Vec<LibraryItem>> {
        let sql = format!("{SELECT_COLUMNS} WHERE deleted = 0 ORDER BY last_opened_at DESC");
        self.query_items(&sql, ()).await
    }

    async fn list_unsynced(&self) -> Result<Vec<LibraryItem>> {
        let sql = format!("{SELECT_COLUMNS} WHERE is_synced = 0 ORDER BY updated_at ASC");
        self.query_items(&sql, ()).await
    }

    async fn upsert(&self, item: &LibraryItem) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO library_items (
                    book_key, local_id, title, file_uri, file_hash, last_locator, last_opened_at,
                    completed, deleted_at, remote_id, updated_at, deleted, is_synced
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(book_key) DO UPDATE SET
                    title = excluded.title,
                    file_uri = excluded.file_uri,
                    file_hash = excluded.file_hash,
                    last_locator = excluded.last_locator,
                    last_opened_at = excluded.last_opened_at,
                    completed = excluded.completed,
                    deleted_at = excluded.deleted_at,
                    remote_id = COALESCE(excluded.remote_id, library_items.remote_id),
                    updated_at = excluded.updated_at,
                    deleted = excluded.deleted,
                    is_synced = excluded.is_synced",
                libsql::params![
                    item.book_key.as_str(),
                    item.local_id.as_str(),
                    item.title.clone(),
                    item.file.to_uri(),
                    item.file_hash.clone(),
                    item.last_locator.as_ref().map(|locator| locator.as_str().to_string()),
                    item.last_opened_at,
                    flag(item.completed),
                    item.deleted_at,
                    item.sync.remote_id.clone(),
                    item.sync.updated_at,
                    flag(item.sync.deleted),
                    flag(item.sync.is_synced),
                ],
            )
            .await?;
        Ok(())
    }

    async fn mark_synced(&self, book_key: &str, remote_id: &str, pushed_at: i64) -> Result<bool> {
        self.conn
            .execute(
                "UPDATE library_items SET remote_id = ?1 WHERE book_key = ?2",
                libsql::params![remote_id, book_key],
            )
            .await?;
        let changed = self
            .conn
            .execute(
                "UPDATE library_items SET is_synced = 1 WHERE book_key = ?1 AND updated_at = ?2",
                libsql::params![book_key, pushed_at],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn apply_remote_tombstone(&self, book_key: &str, deleted_at: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE library_items
                 SET deleted = 1,
                     deleted_at = COALESCE(deleted_at, ?2),
                     updated_at = MAX(updated_at, ?2),
                     is_synced = 1
                 WHERE book_key = ?1",
                libsql::params![book_key, deleted_at],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn set_file(&self, book_key: &str, file: &FileRef) -> Result<()> {
        self.conn
            .execute(
                "UPDATE library_items SET file_uri = ?1 WHERE book_key = ?2",
                libsql::params![file.to_uri(), book_key],
            )
            .await?;
        Ok(())
    }

    async fn purge_synced_tombstones(&self) -> Result<u64> {
        let purged = self
            .conn
            .execute(
                "DELETE FROM library_items WHERE deleted = 1 AND is_synced = 1",
                (),
            )
            .await?;
        Ok(purged)
    }
}
