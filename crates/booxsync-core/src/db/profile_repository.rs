//! AI profile repository

use crate::error::Result;
use crate::models::{AiProfile, LocalId, SyncMeta};
use libsql::{Connection, Row};

use super::{flag, parse_local_id};

const SELECT_COLUMNS: &str = "SELECT local_id, name, model_name, api_key, server_base_url,
    system_prompt, user_prompt_template, use_streaming, temperature, max_tokens, top_p,
    frequency_penalty, presence_penalty, assistant_role, created_at,
    remote_id, updated_at, deleted, is_synced FROM ai_profiles";

/// Trait for AI profile storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ProfileRepository {
    async fn get(&self, id: &LocalId) -> Result<Option<AiProfile>>;
    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<AiProfile>>;
    /// Live profiles whose name matches case-insensitively
    async fn find_by_name(&self, name: &str) -> Result<Vec<AiProfile>>;
    /// Live profiles ordered by name
    async fn list(&self) -> Result<Vec<AiProfile>>;
    async fn list_unsynced(&self) -> Result<Vec<AiProfile>>;
    async fn upsert(&self, profile: &AiProfile) -> Result<()>;
    async fn mark_synced(&self, id: &LocalId, remote_id: &str, pushed_at: i64) -> Result<bool>;
    async fn apply_remote_tombstone(&self, id: &LocalId, deleted_at: i64) -> Result<()>;
    /// Physically remove one profile
    async fn delete(&self, id: &LocalId) -> Result<()>;
    async fn purge_synced_tombstones(&self) -> Result<u64>;
}

/// libSQL implementation of `ProfileRepository`
pub struct LibSqlProfileRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlProfileRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_profiles(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<AiProfile>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut profiles = Vec::new();
        while let Some(row) = rows.next().await? {
            profiles.push(row_to_profile(&row)?);
        }
        Ok(profiles)
    }
}

fn row_to_profile(row: &Row) -> Result<AiProfile> {
    let local_id: String = row.get(0)?;
    Ok(AiProfile {
        local_id: parse_local_id(&local_id)?,
        name: row.get(1)?,
        model_name: row.get(2)?,
        api_key: row.get(3)?,
        server_base_url: row.get(4)?,
        system_prompt: row.get(5)?,
        user_prompt_template: row.get(6)?,
        use_streaming: row.get::<i64>(7)? != 0,
        temperature: row.get(8)?,
        max_tokens: row.get(9)?,
        top_p: row.get(10)?,
        frequency_penalty: row.get(11)?,
        presence_penalty: row.get(12)?,
        assistant_role: row.get(13)?,
        created_at: row.get(14)?,
        sync: SyncMeta {
            remote_id: row.get(15)?,
            updated_at: row.get(16)?,
            deleted: row.get::<i64>(17)? != 0,
            is_synced: row.get::<i64>(18)? != 0,
        },
    })
}

impl ProfileRepository for LibSqlProfileRepository<'_> {
    async fn get(&self, id: &LocalId) -> Result<Option<AiProfile>> {
        let sql = format!("{SELECT_COLUMNS} WHERE local_id = ?1");
        Ok(self.query_profiles(&sql, [id.as_str()]).await?.into_iter().next())
    }

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<AiProfile>> {
        let sql = format!("{SELECT_COLUMNS} WHERE remote_id = ?1 LIMIT 1");
        Ok(self.query_profiles(&sql, [remote_id]).await?.into_iter().next())
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<AiProfile>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE deleted = 0 AND LOWER(TRIM(name)) = ?1 ORDER BY updated_at DESC"
        );
        self.query_profiles(&sql, [name.trim().to_lowercase()]).await
    }

    async fn list(&self) -> Result<Vec<AiProfile>> {
        let sql = format!("{SELECT_COLUMNS} WHERE deleted = 0 ORDER BY name COLLATE NOCASE ASC");
        self.query_profiles(&sql, ()).await
    }

    async fn list_unsynced(&self) -> Result<Vec<AiProfile>> {
        let sql = format!("{SELECT_COLUMNS} WHERE is_synced = 0 ORDER BY updated_at ASC");
        self.query_profiles(&sql, ()).await
    }

    async fn upsert(&self, profile: &AiProfile) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO ai_profiles (
                    local_id, name, model_name, api_key, server_base_url, system_prompt,
                    user_prompt_template, use_streaming, temperature, max_tokens, top_p,
                    frequency_penalty, presence_penalty, assistant_role, created_at,
                    remote_id, updated_at, deleted, is_synced
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                ON CONFLICT(local_id) DO UPDATE SET
                    name = excluded.name,
                    model_name = excluded.model_name,
                    api_key = excluded.api_key,
                    server_base_url = excluded.server_base_url,
                    system_prompt = excluded.system_prompt,
                    user_prompt_template = excluded.user_prompt_template,
                    use_streaming = excluded.use_streaming,
                    temperature = excluded.temperature,
                    max_tokens = excluded.max_tokens,
                    top_p = excluded.top_p,
                    frequency_penalty = excluded.frequency_penalty,
                    presence_penalty = excluded.presence_penalty,
                    assistant_role = excluded.assistant_role,
                    remote_id = COALESCE(excluded.remote_id, ai_profiles.remote_id),
                    updated_at = excluded.updated_at,
                    deleted = excluded.deleted,
                    is_synced = excluded.is_synced",
                libsql::params![
                    profile.local_id.as_str(),
                    profile.name.as_str(),
                    profile.model_name.as_str(),
                    profile.api_key.as_str(),
                    profile.server_base_url.as_str(),
                    profile.system_prompt.as_str(),
                    profile.user_prompt_template.as_str(),
                    flag(profile.use_streaming),
                    profile.temperature,
                    profile.max_tokens,
                    profile.top_p,
                    profile.frequency_penalty,
                    profile.presence_penalty,
                    profile.assistant_role.as_str(),
                    profile.created_at,
                    profile.sync.remote_id.clone(),
                    profile.sync.updated_at,
                    flag(profile.sync.deleted),
                    flag(profile.sync.is_synced),
                ],
            )
            .await?;
        Ok(())
    }

    async fn mark_synced(&self, id: &LocalId, remote_id: &str, pushed_at: i64) -> Result<bool> {
        let local_id = id.as_str();
        self.conn
            .execute(
                "UPDATE ai_profiles SET remote_id = ?1 WHERE local_id = ?2",
                libsql::params![remote_id, local_id.as_str()],
            )
            .await?;
        let changed = self
            .conn
            .execute(
                "UPDATE ai_profiles SET is_synced = 1 WHERE local_id = ?1 AND updated_at = ?2",
                libsql::params![local_id, pushed_at],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn apply_remote_tombstone(&self, id: &LocalId, deleted_at: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE ai_profiles
                 SET deleted = 1, updated_at = MAX(updated_at, ?2), is_synced = 1
                 WHERE local_id = ?1",
                libsql::params![id.as_str(), deleted_at],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &LocalId) -> Result<()> {
        self.conn
            .execute("DELETE FROM ai_profiles WHERE local_id = ?1", [id.as_str()])
            .await?;
        Ok(())
    }

    async fn purge_synced_tombstones(&self) -> Result<u64> {
        let purged = self
            .conn
            .execute("DELETE FROM ai_profiles WHERE deleted = 1 AND is_synced = 1", ())
            .await?;
        Ok(purged)
    }
}
