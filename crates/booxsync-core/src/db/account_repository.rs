//! Signed-in account persistence

use crate::auth::SessionUser;
use crate::error::Result;
use libsql::Connection;

/// Storage for the identity the local data belongs to
#[allow(async_fn_in_trait)]
pub trait AccountRepository {
    async fn load(&self) -> Result<Option<SessionUser>>;
    async fn save(&self, user: &SessionUser) -> Result<()>;
}

/// libSQL implementation of `AccountRepository`
pub struct LibSqlAccountRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlAccountRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl AccountRepository for LibSqlAccountRepository<'_> {
    async fn load(&self) -> Result<Option<SessionUser>> {
        let mut rows = self
            .conn
            .query("SELECT user_id, email FROM account WHERE id = 1", ())
            .await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(SessionUser {
                id: row.get(0)?,
                email: row.get(1)?,
            }))
        } else {
            Ok(None)
        }
    }

    async fn save(&self, user: &SessionUser) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO account (id, user_id, email) VALUES (1, ?1, ?2)",
                libsql::params![user.id.as_str(), user.email.clone()],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn save_replaces_previous_account() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlAccountRepository::new(db.connection());
        assert!(repo.load().await.unwrap().is_none());

        repo.save(&SessionUser {
            id: "u1".into(),
            email: Some("a@example.com".into()),
        })
        .await
        .unwrap();
        repo.save(&SessionUser {
            id: "u2".into(),
            email: None,
        })
        .await
        .unwrap();

        let loaded = repo.load().await.unwrap().unwrap();
        assert_eq!(loaded.id, "u2");
        assert_eq!(loaded.email, None);
    }
}
