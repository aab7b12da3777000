//! Reading position repository

use crate::error::Result;
use crate::models::{Locator, ReadingPosition};
use libsql::{Connection, Row};

use super::{flag, parse_local_id};

const SELECT_COLUMNS: &str =
    "SELECT local_id, book_key, locator, remote_id, updated_at, is_synced FROM reading_positions";

/// Trait for reading position storage operations (async)
#[allow(async_fn_in_trait)]
pub trait PositionRepository {
    async fn get(&self, book_key: &str) -> Result<Option<ReadingPosition>>;
    async fn list_unsynced(&self) -> Result<Vec<ReadingPosition>>;
    /// Insert or overwrite the snapshot for `position.book_key`
    async fn upsert(&self, position: &ReadingPosition) -> Result<()>;
    async fn mark_synced(&self, book_key: &str, remote_id: &str, pushed_at: i64) -> Result<bool>;
    async fn delete(&self, book_key: &str) -> Result<()>;
}

/// libSQL implementation of `PositionRepository`
pub struct LibSqlPositionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlPositionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn row_to_position(row: &Row) -> Result<ReadingPosition> {
    let local_id: String = row.get(0)?;
    let locator: String = row.get(2)?;
    Ok(ReadingPosition {
        local_id: parse_local_id(&local_id)?,
        book_key: row.get(1)?,
        locator: Locator::parse(locator)?,
        remote_id: row.get(3)?,
        updated_at: row.get(4)?,
        is_synced: row.get::<i64>(5)? != 0,
    })
}

impl PositionRepository for LibSqlPositionRepository<'_> {
    async fn get(&self, book_key: &str) -> Result<Option<ReadingPosition>> {
        let mut rows = self
            .conn
            .query(&format!("{SELECT_COLUMNS} WHERE book_key = ?1"), [book_key])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_position(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_unsynced(&self) -> Result<Vec<ReadingPosition>> {
        let mut rows = self
            .conn
            .query(&format!("{SELECT_COLUMNS} WHERE is_synced = 0"), ())
            .await?;
        let mut positions = Vec::new();
        while let Some(row) = rows.next().await? {
            match row_to_position(&row) {
                Ok(position) => positions.push(position),
                Err(error) => tracing::warn!("Skipping unreadable reading position: {}", error),
            }
        }
        Ok(positions)
    }

    async fn upsert(&self, position: &ReadingPosition) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO reading_positions (book_key, local_id, locator, remote_id, updated_at, is_synced)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(book_key) DO UPDATE SET
                    locator = excluded.locator,
                    remote_id = COALESCE(excluded.remote_id, reading_positions.remote_id),
                    updated_at = excluded.updated_at,
                    is_synced = excluded.is_synced",
                libsql::params![
                    position.book_key.as_str(),
                    position.local_id.as_str(),
                    position.locator.as_str(),
                    position.remote_id.clone(),
                    position.updated_at,
                    flag(position.is_synced),
                ],
            )
            .await?;
        Ok(())
    }

    async fn mark_synced(&self, book_key: &str, remote_id: &str, pushed_at: i64) -> Result<bool> {
        self.conn
            .execute(
                "UPDATE reading_positions SET remote_id = ?1 WHERE book_key = ?2",
                libsql::params![remote_id, book_key],
            )
            .await?;
        let changed = self
            .conn
            .execute(
                "UPDATE reading_positions SET is_synced = 1 WHERE book_key = ?1 AND updated_at = ?2",
                libsql::params![book_key, pushed_at],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn delete(&self, book_key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM reading_positions WHERE book_key = ?1", [book_key])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn older_snapshot_does_not_replace_newer() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlPositionRepository::new(db.connection());
        let newer = ReadingPosition::new("b", Locator::parse(r#"{"href":"c2"}"#).unwrap(), 200);
        let older = ReadingPosition::new("b", Locator::parse(r#"{"href":"c1"}"#).unwrap(), 100);

        repo.upsert(&newer).await.unwrap();
        repo.upsert(&older).await.unwrap();

        let loaded = repo.get("b").await.unwrap().unwrap();
        assert_eq!(loaded.locator.href(), "c2");
        assert_eq!(loaded.updated_at, 200);
    }
}
