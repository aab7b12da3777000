//! AI note repository

use crate::error::Result;
use crate::models::{AiNote, ChatTurn, LocalId, SyncMeta};
use libsql::{Connection, Row};

use super::{flag, parse_local_id, stored_locator};

const SELECT_COLUMNS: &str = "SELECT local_id, book_key, book_title, messages, original_text,
    ai_response, locator, profile_remote_id, created_at, remote_id, updated_at, deleted, is_synced
    FROM ai_notes";

/// Trait for AI note storage operations (async)
#[allow(async_fn_in_trait)]
pub trait NoteRepository {
    async fn get(&self, id: &LocalId) -> Result<Option<AiNote>>;
    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<AiNote>>;
    /// Live notes, newest first; `book_key = None` lists every note
    async fn list(&self, book_key: Option<&str>, limit: usize) -> Result<Vec<AiNote>>;
    /// Every note including tombstones, oldest first
    async fn list_all(&self) -> Result<Vec<AiNote>>;
    async fn list_unsynced(&self) -> Result<Vec<AiNote>>;
    async fn upsert(&self, note: &AiNote) -> Result<()>;
    async fn mark_synced(&self, id: &LocalId, remote_id: &str, pushed_at: i64) -> Result<bool>;
    async fn apply_remote_tombstone(&self, id: &LocalId, deleted_at: i64) -> Result<()>;
    /// Physically remove one note
    async fn delete(&self, id: &LocalId) -> Result<()>;
    async fn purge_synced_tombstones(&self) -> Result<u64>;
}

/// libSQL implementation of `NoteRepository`
pub struct LibSqlNoteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlNoteRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_notes(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<AiNote>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next().await? {
            notes.push(row_to_note(&row)?);
        }
        Ok(notes)
    }
}

fn row_to_note(row: &Row) -> Result<AiNote> {
    let local_id: String = row.get(0)?;
    let messages: String = row.get(3)?;
    let turns: Vec<ChatTurn> = serde_json::from_str(&messages)?;
    Ok(AiNote {
        local_id: parse_local_id(&local_id)?,
        book_key: row.get(1)?,
        book_title: row.get(2)?,
        turns,
        original_text: row.get(4)?,
        ai_response: row.get(5)?,
        locator: stored_locator(row.get(6)?),
        profile_remote_id: row.get(7)?,
        created_at: row.get(8)?,
        sync: SyncMeta {
            remote_id: row.get(9)?,
            updated_at: row.get(10)?,
            deleted: row.get::<i64>(11)? != 0,
            is_synced: row.get::<i64>(12)? != 0,
        },
    })
}

impl NoteRepository for LibSqlNoteRepository<'_> {
    async fn get(&self, id: &LocalId) -> Result<Option<AiNote>> {
        let sql = format!("{SELECT_COLUMNS} WHERE local_id = ?1");
        Ok(self.query_notes(&sql, [id.as_str()]).await?.into_iter().next())
    }

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<AiNote>> {
        let sql = format!("{SELECT_COLUMNS} WHERE remote_id = ?1 LIMIT 1");
        Ok(self.query_notes(&sql, [remote_id]).await?.into_iter().next())
    }

    async fn list(&self, book_key: Option<&str>, limit: usize) -> Result<Vec<AiNote>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        match book_key {
            Some(book_key) => {
                let sql = format!(
                    "{SELECT_COLUMNS} WHERE deleted = 0 AND book_key = ?1 ORDER BY created_at DESC LIMIT ?2"
                );
                self.query_notes(&sql, libsql::params![book_key, limit]).await
            }
            None => {
                let sql =
                    format!("{SELECT_COLUMNS} WHERE deleted = 0 ORDER BY created_at DESC LIMIT ?1");
                self.query_notes(&sql, [limit]).await
            }
        }
    }

    async fn list_all(&self) -> Result<Vec<AiNote>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY created_at ASC");
        self.query_notes(&sql, ()).await
    }

    async fn list_unsynced(&self) -> Result<Vec<AiNote>> {
        let sql = format!("{SELECT_COLUMNS} WHERE is_synced = 0 ORDER BY updated_at ASC");
        self.query_notes(&sql, ()).await
    }

    async fn upsert(&self, note: &AiNote) -> Result<()> {
        let messages = serde_json::to_string(&note.turns)?;
        self.conn
            .execute(
                "INSERT INTO ai_notes (
                    local_id, book_key, book_title, messages, original_text, ai_response,
                    locator, profile_remote_id, created_at, remote_id, updated_at, deleted, is_synced
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(local_id) DO UPDATE SET
                    book_key = excluded.book_key,
                    book_title = excluded.book_title,
                    messages = excluded.messages,
                    original_text = excluded.original_text,
                    ai_response = excluded.ai_response,
                    locator = excluded.locator,
                    profile_remote_id = excluded.profile_remote_id,
                    remote_id = COALESCE(excluded.remote_id, ai_notes.remote_id),
                    updated_at = excluded.updated_at,
                    deleted = excluded.deleted,
                    is_synced = excluded.is_synced",
                libsql::params![
                    note.local_id.as_str(),
                    note.book_key.clone(),
                    note.book_title.clone(),
                    messages,
                    note.original_text.clone(),
                    note.ai_response.clone(),
                    note.locator.as_ref().map(|locator| locator.as_str().to_string()),
                    note.profile_remote_id.clone(),
                    note.created_at,
                    note.sync.remote_id.clone(),
                    note.sync.updated_at,
                    flag(note.sync.deleted),
                    flag(note.sync.is_synced),
                ],
            )
            .await?;
        Ok(())
    }

    async fn mark_synced(&self, id: &LocalId, remote_id: &str, pushed_at: i64) -> Result<bool> {
        let local_id = id.as_str();
        self.conn
            .execute(
                "UPDATE ai_notes SET remote_id = ?1 WHERE local_id = ?2",
                libsql::params![remote_id, local_id.as_str()],
            )
            .await?;
        let changed = self
            .conn
            .execute(
                "UPDATE ai_notes SET is_synced = 1 WHERE local_id = ?1 AND updated_at = ?2",
                libsql::params![local_id, pushed_at],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn apply_remote_tombstone(&self, id: &LocalId, deleted_at: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE ai_notes
                 SET deleted = 1, updated_at = MAX(updated_at, ?2), is_synced = 1
                 WHERE local_id = ?1",
                libsql::params![id.as_str(), deleted_at],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &LocalId) -> Result<()> {
        self.conn
            .execute("DELETE FROM ai_notes WHERE local_id = ?1", [id.as_str()])
            .await?;
        Ok(())
    }

    async fn purge_synced_tombstones(&self) -> Result<u64> {
        let purged = self
            .conn
            .execute("DELETE FROM ai_notes WHERE deleted = 1 AND is_synced = 1", ())
            .await?;
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Locator;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_and_get_roundtrip() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlNoteRepository::new(db.connection());

        let mut note = AiNote::new(Some("book".into()), "What is entropy?");
        note.turns.push(ChatTurn::assistant("A measure of disorder."));
        note.locator = Some(Locator::parse(r#"{"href":"c4.xhtml"}"#).unwrap());
        repo.upsert(&note).await.unwrap();

        let loaded = repo.get(&note.local_id).await.unwrap().unwrap();
        assert_eq!(loaded, note);
        assert_eq!(loaded.response(), "A measure of disorder.");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_filters_by_book() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlNoteRepository::new(db.connection());
        repo.upsert(&AiNote::new(Some("a".into()), "one")).await.unwrap();
        repo.upsert(&AiNote::new(Some("b".into()), "two")).await.unwrap();
        repo.upsert(&AiNote::new(None, "three")).await.unwrap();

        assert_eq!(repo.list(Some("a"), 10).await.unwrap().len(), 1);
        assert_eq!(repo.list(None, 10).await.unwrap().len(), 3);
        assert_eq!(repo.list(None, 2).await.unwrap().len(), 2);
    }
}
