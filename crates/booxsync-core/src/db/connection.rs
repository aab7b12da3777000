//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection};
use std::path::Path;

use super::migrations;

/// Tables holding per-user data, in wipe order.
const USER_TABLES: [&str; 8] = [
    "bookmarks",
    "ai_notes",
    "reading_positions",
    "library_items",
    "ai_profiles",
    "settings",
    "sync_conflicts",
    "account",
];

/// Database wrapper for libSQL connections
pub struct Database {
    _db: libsql::Database,
    conn: Connection,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    async fn configure(&self) -> Result<()> {
        // WAL is unavailable for in-memory databases
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Delete every per-user row. The schema is kept.
    pub async fn clear_user_data(&self) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        for table in USER_TABLES {
            if let Err(e) = self.conn.execute(&format!("DELETE FROM {table}"), ()).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
        }
        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        tracing::info!("Cleared local user data");
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn count(db: &Database, table: &str) -> i64 {
        let mut rows = db
            .connection()
            .query(&format!("SELECT COUNT(*) FROM {table}"), ())
            .await
            .unwrap();
        rows.next().await.unwrap().unwrap().get::<i64>(0).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory().await.unwrap();
        let mut rows = db.connection().query("SELECT 1", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i32>(0).unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_file_creates_schema() {
        let tmp = tempdir().unwrap();
        let db = Database::open(tmp.path().join("booxsync.db")).await.unwrap();
        assert_eq!(count(&db, "library_items").await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear_user_data_empties_tables() {
        let db = Database::open_in_memory().await.unwrap();
        db.connection()
            .execute(
                "INSERT INTO settings (key, value) VALUES ('language', 'en')",
                (),
            )
            .await
            .unwrap();
        db.connection()
            .execute(
                "INSERT INTO account (id, user_id, email) VALUES (1, 'u1', NULL)",
                (),
            )
            .await
            .unwrap();

        db.clear_user_data().await.unwrap();

        assert_eq!(count(&db, "settings").await, 0);
        assert_eq!(count(&db, "account").await, 0);
    }
}
