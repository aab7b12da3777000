//! Reader settings: one record per account.

use serde_json::Value;

use super::records::{self, RemoteSettings, SETTINGS};
use super::rest::user_filter;
use super::{decode, PullReport, PushOutcome, PushRequest, SyncGateway};
use crate::db::{LibSqlSettingsRepository, SettingsRepository};
use crate::models::ConflictWinner;
use crate::Result;

const RECORD_KEY: &str = "settings";

impl SyncGateway {
    pub async fn push_settings(&self) -> Result<PushOutcome> {
        let user_id = self.user_id().await?;
        let settings = self.db.load_settings().await?;
        let filter = user_filter(&user_id);

        let remote_id = match &settings.sync.remote_id {
            Some(id) => Some(id.clone()),
            None => self
                .rest
                .find_one(SETTINGS, &filter)
                .await?
                .and_then(|record| record.get("id").and_then(Value::as_str).map(str::to_string)),
        };

        let request = PushRequest {
            collection: SETTINGS,
            record_key: RECORD_KEY,
            remote_id: remote_id.as_deref(),
            key_filter: Some(filter.clone()),
            updated_at: settings.sync.updated_at,
            deleted: false,
            payload: records::settings_payload(&user_id, &settings),
        };
        let (outcome, _) = self.push_record(request).await?;

        let db = self.db.lock().await;
        LibSqlSettingsRepository::new(db.connection())
            .mark_synced(outcome.remote_id(), settings.sync.updated_at)
            .await?;
        Ok(outcome)
    }

    /// Apply the remote settings when they are strictly newer than local ones.
    pub async fn pull_settings(&self) -> Result<PullReport> {
        let user_id = self.user_id().await?;
        let mut report = PullReport::default();
        let Some(record) = self.rest.find_one(SETTINGS, &user_filter(&user_id)).await? else {
            return Ok(report);
        };
        let Some(remote) = decode::<RemoteSettings>(SETTINGS, record, &mut report) else {
            return Ok(report);
        };

        let db = self.db.lock().await;
        let repo = LibSqlSettingsRepository::new(db.connection());
        let local = repo.load().await?;

        if remote.updated_at > local.sync.updated_at {
            tracing::debug!("Applying remote settings from {}", remote.updated_at);
            repo.save(&remote.apply_to(&local)).await?;
            report.updated += 1;
            return Ok(report);
        }

        if local.sync.remote_id.is_none() {
            repo.mark_synced(&remote.id, remote.updated_at).await?;
        }
        report.ignored += 1;
        if remote.updated_at < local.sync.updated_at {
            drop(db);
            self.record_conflict(
                SETTINGS,
                RECORD_KEY,
                local.sync.updated_at,
                remote.updated_at,
                ConflictWinner::Local,
            )
            .await;
        }
        Ok(report)
    }
}
