//! Bookmark repository

use crate::error::Result;
use crate::models::{Bookmark, LocalId, Locator, SyncMeta};
use libsql::{Connection, Row};

use super::{flag, parse_local_id};

const SELECT_COLUMNS: &str = "SELECT local_id, book_key, locator, highlight, created_at,
    remote_id, updated_at, deleted, is_synced FROM bookmarks";

/// Trait for bookmark storage operations (async)
#[allow(async_fn_in_trait)]
pub trait BookmarkRepository {
    async fn get(&self, id: &LocalId) -> Result<Option<Bookmark>>;
    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<Bookmark>>;
    /// Never-pushed bookmark at the same place in the same book
    async fn find_unlinked(&self, book_key: &str, locator: &Locator) -> Result<Option<Bookmark>>;
    /// Live bookmarks of a book, newest first
    async fn list_for_book(&self, book_key: &str) -> Result<Vec<Bookmark>>;
    async fn list_unsynced(&self) -> Result<Vec<Bookmark>>;
    async fn upsert(&self, bookmark: &Bookmark) -> Result<()>;
    async fn mark_synced(&self, id: &LocalId, remote_id: &str, pushed_at: i64) -> Result<bool>;
    async fn apply_remote_tombstone(&self, id: &LocalId, deleted_at: i64) -> Result<()>;
    async fn purge_synced_tombstones(&self) -> Result<u64>;
}

/// libSQL implementation of `BookmarkRepository`
pub struct LibSqlBookmarkRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlBookmarkRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_bookmarks(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Bookmark>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut bookmarks = Vec::new();
        while let Some(row) = rows.next().await? {
            bookmarks.push(row_to_bookmark(&row)?);
        }
        Ok(bookmarks)
    }
}

fn row_to_bookmark(row: &Row) -> Result<Bookmark> {
    let local_id: String = row.get(0)?;
    let locator: String = row.get(2)?;
    Ok(Bookmark {
        local_id: parse_local_id(&local_id)?,
        book_key: row.get(1)?,
        locator: Locator::parse(locator)?,
        highlight: row.get(3)?,
        created_at: row.get(4)?,
        sync: SyncMeta {
            remote_id: row.get(5)?,
            updated_at: row.get(6)?,
            deleted: row.get::<i64>(7)? != 0,
            is_synced: row.get::<i64>(8)? != 0,
        },
    })
}

impl BookmarkRepository for LibSqlBookmarkRepository<'_> {
    async fn get(&self, id: &LocalId) -> Result<Option<Bookmark>> {
        let sql = format!("{SELECT_COLUMNS} WHERE local_id = ?1");
        Ok(self
            .query_bookmarks(&sql, [id.as_str()])
            .await?
            .into_iter()
            .next())
    }

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<Bookmark>> {
        let sql = format!("{SELECT_COLUMNS} WHERE remote_id = ?1 LIMIT 1");
        Ok(self.query_bookmarks(&sql, [remote_id]).await?.into_iter().next())
    }

    async fn find_unlinked(&self, book_key: &str, locator: &Locator) -> Result<Option<Bookmark>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE remote_id IS NULL AND book_key = ?1 AND locator = ?2 LIMIT 1"
        );
        Ok(self
            .query_bookmarks(&sql, [book_key, locator.as_str()])
            .await?
            .into_iter()
            .next())
    }

    async fn list_for_book(&self, book_key: &str) -> Result<Vec<Bookmark>> {
        let sql =
            format!("{SELECT_COLUMNS} WHERE book_key = ?1 AND deleted = 0 ORDER BY created_at DESC");
        self.query_bookmarks(&sql, [book_key]).await
    }

    async fn list_unsynced(&self) -> Result<Vec<Bookmark>> {
        let sql = format!("{SELECT_COLUMNS} WHERE is_synced = 0 ORDER BY updated_at ASC");
        self.query_bookmarks(&sql, ()).await
    }

    async fn upsert(&self, bookmark: &Bookmark) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO bookmarks (
                    local_id, book_key, locator, highlight, created_at,
                    remote_id, updated_at, deleted, is_synced
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(local_id) DO UPDATE SET
                    book_key = excluded.book_key,
                    locator = excluded.locator,
                    highlight = excluded.highlight,
                    remote_id = COALESCE(excluded.remote_id, bookmarks.remote_id),
                    updated_at = excluded.updated_at,
                    deleted = excluded.deleted,
                    is_synced = excluded.is_synced",
                libsql::params![
                    bookmark.local_id.as_str(),
                    bookmark.book_key.as_str(),
                    bookmark.locator.as_str(),
                    bookmark.highlight.clone(),
                    bookmark.created_at,
                    bookmark.sync.remote_id.clone(),
                    bookmark.sync.updated_at,
                    flag(bookmark.sync.deleted),
                    flag(bookmark.sync.is_synced),
                ],
            )
            .await?;
        Ok(())
    }

    async fn mark_synced(&self, id: &LocalId, remote_id: &str, pushed_at: i64) -> Result<bool> {
        let local_id = id.as_str();
        self.conn
            .execute(
                "UPDATE bookmarks SET remote_id = ?1 WHERE local_id = ?2",
                libsql::params![remote_id, local_id.as_str()],
            )
            .await?;
        let changed = self
            .conn
            .execute(
                "UPDATE bookmarks SET is_synced = 1 WHERE local_id = ?1 AND updated_at = ?2",
                libsql::params![local_id, pushed_at],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn apply_remote_tombstone(&self, id: &LocalId, deleted_at: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE bookmarks
                 SET deleted = 1, updated_at = MAX(updated_at, ?2), is_synced = 1
                 WHERE local_id = ?1",
                libsql::params![id.as_str(), deleted_at],
            )
            .await?;
        Ok(())
    }

    async fn purge_synced_tombstones(&self) -> Result<u64> {
        let purged = self
            .conn
            .execute("DELETE FROM bookmarks WHERE deleted = 1 AND is_synced = 1", ())
            .await?;
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn locator(href: &str) -> Locator {
        Locator::parse(format!(r#"{{"href":"{href}"}}"#)).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn find_unlinked_matches_book_and_locator() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlBookmarkRepository::new(db.connection());
        let bookmark = Bookmark::new("book", locator("c1"), Some("note".into()));
        repo.upsert(&bookmark).await.unwrap();

        let found = repo.find_unlinked("book", &locator("c1")).await.unwrap();
        assert_eq!(found, Some(bookmark.clone()));
        assert!(repo.find_unlinked("book", &locator("c2")).await.unwrap().is_none());

        repo.mark_synced(&bookmark.local_id, "r1", bookmark.sync.updated_at)
            .await
            .unwrap();
        assert!(repo.find_unlinked("book", &locator("c1")).await.unwrap().is_none());
        let linked = repo.find_by_remote_id("r1").await.unwrap().unwrap();
        assert!(linked.sync.is_synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tombstoned_bookmarks_leave_book_listing() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlBookmarkRepository::new(db.connection());
        let bookmark = Bookmark::new("book", locator("c1"), None);
        repo.upsert(&bookmark).await.unwrap();

        repo.apply_remote_tombstone(&bookmark.local_id, 1).await.unwrap();

        assert!(repo.list_for_book("book").await.unwrap().is_empty());
        assert_eq!(repo.purge_synced_tombstones().await.unwrap(), 1);
    }
}
