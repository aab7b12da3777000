use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use booxsync_core::auth::{SessionUser, TokenStore};
use booxsync_core::config::ClientConfig;
use booxsync_core::models::SyncConflict;
use booxsync_core::orchestrator::{EntitySummary, SyncOrchestrator, SyncSummary};
use booxsync_core::services::DatabaseService;
use serde::Serialize;

use crate::config_profiles::{profile_data_dir, CliProfilesConfig};
use crate::error::CliError;
use crate::token_store::KeyringTokenStore;

const DB_PATH_ENV: &str = "BOOXSYNC_DB_PATH";
const DB_FILE_NAME: &str = "booxsync.db";
const LIBRARY_DIR_NAME: &str = "library";

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub collection: String,
    pub record_key: String,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub winner: String,
}

/// Orchestrator bound to one CLI profile
pub struct Session {
    pub profile_name: String,
    pub orchestrator: SyncOrchestrator,
}

impl Session {
    /// The signed-in account, or [`CliError::NotSignedIn`].
    pub async fn require_user(&self) -> Result<SessionUser, CliError> {
        self.orchestrator
            .current_user()
            .await?
            .ok_or(CliError::NotSignedIn)
    }
}

pub fn resolve_db_path(cli_db_path: Option<&Path>, profile_name: &str) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env::var_os(DB_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(profile_data_dir(profile_name)?.join(DB_FILE_NAME))
}

pub fn default_library_dir(profile_name: &str) -> Result<PathBuf, CliError> {
    Ok(profile_data_dir(profile_name)?.join(LIBRARY_DIR_NAME))
}

/// Engine config of a profile, falling back to `BOOXSYNC_*` environment variables.
pub fn resolve_client_config(
    config: &CliProfilesConfig,
    profile_name: &str,
) -> Result<ClientConfig, CliError> {
    let library_dir = default_library_dir(profile_name)?;
    let from_profile = match config.profile(profile_name) {
        Some(profile) => profile.client_config(&library_dir)?,
        None => None,
    };
    if let Some(client_config) = from_profile {
        return Ok(client_config);
    }

    ClientConfig::from_env(&library_dir)?.ok_or_else(|| {
        CliError::Config(format!(
            "Profile '{profile_name}' has no backend URL. Run `booxsync config init --profile {profile_name} --backend-url <URL>` first."
        ))
    })
}

pub async fn open_session(
    global_profile: Option<&str>,
    cli_db_path: Option<&Path>,
) -> Result<Session, CliError> {
    let config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(global_profile);
    let client_config = resolve_client_config(&config, &profile_name)?;
    let db_path = resolve_db_path(cli_db_path, &profile_name)?;
    tracing::debug!("Opening {} for profile '{}'", db_path.display(), profile_name);

    let db = DatabaseService::open_path(db_path).await?;
    let tokens: Arc<dyn TokenStore> = Arc::new(KeyringTokenStore::new(&profile_name));
    let orchestrator = SyncOrchestrator::new(client_config, tokens, db)?;
    Ok(Session {
        profile_name,
        orchestrator,
    })
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        collection: conflict.collection.clone(),
        record_key: conflict.record_key.clone(),
        local_updated_at: conflict.local_updated_at,
        incoming_updated_at: conflict.incoming_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        winner: conflict.winner.as_str().to_string(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<6}  {}={}  local={} incoming={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.winner.as_str(),
                conflict.collection,
                conflict.record_key,
                conflict.local_updated_at,
                conflict.incoming_updated_at
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

fn has_activity(entity: &EntitySummary) -> bool {
    let pulled = entity.pulled.updated + entity.pulled.skipped;
    let pushed = entity.pushed.pushed + entity.pushed.stale + entity.pushed.failed;
    pulled + pushed > 0
}

/// One line per entity type that moved, plus the purge count.
pub fn format_sync_summary_lines(summary: &SyncSummary) -> Vec<String> {
    let mut lines = summary
        .entities()
        .into_iter()
        .filter(|(_, entity)| has_activity(entity))
        .map(|(label, entity)| {
            let mut line = format!(
                "{label:<10} pulled {} pushed {}",
                entity.pulled.updated, entity.pushed.pushed
            );
            if entity.pushed.stale > 0 {
                line.push_str(&format!(", {} stale", entity.pushed.stale));
            }
            if entity.pulled.skipped > 0 {
                line.push_str(&format!(", {} malformed", entity.pulled.skipped));
            }
            if entity.pushed.failed > 0 {
                line.push_str(&format!(", {} failed", entity.pushed.failed));
            }
            line
        })
        .collect::<Vec<_>>();

    if summary.purged > 0 {
        lines.push(format!("Purged {} synced tombstones", summary.purged));
    }
    lines
}
