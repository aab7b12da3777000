//! Diagnostic log of last-write-wins decisions

use crate::error::Result;
use crate::models::{ConflictWinner, SyncConflict};
use libsql::Connection;

/// Trait for conflict log operations (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    /// Record a conflict resolved during a pull
    async fn record(
        &self,
        collection: &str,
        record_key: &str,
        local_updated_at: i64,
        incoming_updated_at: i64,
        winner: ConflictWinner,
    ) -> Result<()>;

    /// Most recent conflicts first
    async fn list(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn record(
        &self,
        collection: &str,
        record_key: &str,
        local_updated_at: i64,
        incoming_updated_at: i64,
        winner: ConflictWinner,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_conflicts (
                    collection, record_key, local_updated_at, incoming_updated_at, resolved_at, winner
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                libsql::params![
                    collection,
                    record_key,
                    local_updated_at,
                    incoming_updated_at,
                    crate::util::now_millis(),
                    winner.as_str(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn
            .query(
                "SELECT id, collection, record_key, local_updated_at, incoming_updated_at, resolved_at, winner
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?1",
                [limit],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            let winner: String = row.get(6)?;
            conflicts.push(SyncConflict {
                id: row.get(0)?,
                collection: row.get(1)?,
                record_key: row.get(2)?,
                local_updated_at: row.get(3)?,
                incoming_updated_at: row.get(4)?,
                resolved_at: row.get(5)?,
                winner: ConflictWinner::parse(&winner),
            });
        }
        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn record_and_list_newest_first() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());
        repo.record("books", "k1", 200, 100, ConflictWinner::Local)
            .await
            .unwrap();
        repo.record("books", "k2", 100, 300, ConflictWinner::Remote)
            .await
            .unwrap();

        let conflicts = repo.list(10).await.unwrap();
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].record_key, "k2");
        assert_eq!(conflicts[0].winner, ConflictWinner::Remote);
    }
}
