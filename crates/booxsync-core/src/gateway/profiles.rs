//! AI provider profiles.
//!
//! Profiles are identified across devices by name as well as by remote id.
//! When several profiles share a name, the one with a usable API key wins,
//! then the newer one. Both sides are collapsed to a single profile per name.

use std::collections::HashMap;

use super::records::{self, RemoteProfile, AI_PROFILES};
use super::rest::{quote, user_filter};
use super::{
    decode, prefer_local_profile, prefer_profile, PullReport, PushOutcome, PushReport,
    PushRequest, SyncGateway,
};
use crate::db::{
    LibSqlProfileRepository, LibSqlSettingsRepository, ProfileRepository, SettingsRepository,
};
use crate::models::{AiProfile, ConflictWinner, LocalId};
use crate::util::now_millis;
use crate::{Error, Result};

fn name_filter(user_id: &str, name: &str) -> String {
    format!("(user={} && name~{})", quote(user_id), quote(name.trim()))
}

/// Remote profile paired with its materialized form
struct Candidate {
    remote: RemoteProfile,
    profile: AiProfile,
}

impl Candidate {
    fn new(remote: RemoteProfile) -> Self {
        let profile = remote.to_profile(LocalId::new());
        Self { remote, profile }
    }

    fn beats(&self, other: &Self) -> bool {
        prefer_profile(
            (&self.profile, &self.remote.id),
            (&other.profile, &other.remote.id),
        )
    }
}

/// Best live remote profile per case-insensitive name.
fn preferred_by_name(remotes: Vec<RemoteProfile>) -> HashMap<String, Candidate> {
    let mut best: HashMap<String, Candidate> = HashMap::new();
    for remote in remotes.into_iter().filter(|remote| !remote.deleted) {
        let candidate = Candidate::new(remote);
        let key = candidate.profile.name_key();
        if key.is_empty() {
            continue;
        }
        match best.get(&key) {
            Some(current) if !candidate.beats(current) => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }
    best
}

impl SyncGateway {
    pub async fn push_profile(&self, id: &LocalId) -> Result<PushOutcome> {
        let user_id = self.user_id().await?;
        let profile = {
            let db = self.db.lock().await;
            LibSqlProfileRepository::new(db.connection())
                .get(id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Profile {id}")))?
        };
        let record_key = profile.name.trim().to_string();
        let filter = name_filter(&user_id, &profile.name);

        let mut remote_id = profile.sync.remote_id.clone();
        if remote_id.is_none() && !profile.sync.deleted {
            if let Some(existing) = self.find_remote_profile(&filter, &profile).await? {
                if !profile.has_usable_api_key() && existing.profile.has_usable_api_key() {
                    tracing::info!(
                        "Profile {} has no usable key, adopting remote {} without overwriting",
                        record_key,
                        existing.remote.id
                    );
                    let db = self.db.lock().await;
                    LibSqlProfileRepository::new(db.connection())
                        .mark_synced(id, &existing.remote.id, profile.sync.updated_at)
                        .await?;
                    return Ok(PushOutcome::Adopted(existing.remote.id));
                }
                remote_id = Some(existing.remote.id);
            }
        }

        let request = PushRequest {
            collection: AI_PROFILES,
            record_key: &record_key,
            remote_id: remote_id.as_deref(),
            key_filter: Some(filter.clone()),
            updated_at: profile.sync.updated_at,
            deleted: profile.sync.deleted,
            payload: records::profile_payload(&user_id, &profile),
        };
        let (outcome, _) = self.push_record(request).await?;

        let db = self.db.lock().await;
        let repo = LibSqlProfileRepository::new(db.connection());
        repo.mark_synced(id, outcome.remote_id(), profile.sync.updated_at)
            .await?;
        if let PushOutcome::RemoteDeleted { deleted_at, .. } = &outcome {
            repo.apply_remote_tombstone(id, *deleted_at).await?;
        }
        Ok(outcome)
    }

    /// Preferred live remote profile with the same name as `profile`.
    async fn find_remote_profile(
        &self,
        filter: &str,
        profile: &AiProfile,
    ) -> Result<Option<Candidate>> {
        let mut report = PullReport::default();
        let remotes = self
            .rest
            .list(AI_PROFILES, filter)
            .await?
            .into_iter()
            .filter_map(|record| decode::<RemoteProfile>(AI_PROFILES, record, &mut report))
            .collect();
        Ok(preferred_by_name(remotes).remove(&profile.name_key()))
    }

    pub async fn push_pending_profiles(&self) -> Result<PushReport> {
        let pending = {
            let db = self.db.lock().await;
            LibSqlProfileRepository::new(db.connection())
                .list_unsynced()
                .await?
        };
        let mut report = PushReport::default();
        for profile in pending {
            let result = self.push_profile(&profile.local_id).await;
            report.tally(AI_PROFILES, profile.name.trim(), result)?;
        }
        Ok(report)
    }

    pub async fn pull_profiles(&self) -> Result<PullReport> {
        let user_id = self.user_id().await?;
        let mut report = PullReport::default();
        let remotes: Vec<RemoteProfile> = self
            .rest
            .list(AI_PROFILES, &user_filter(&user_id))
            .await?
            .into_iter()
            .filter_map(|record| decode::<RemoteProfile>(AI_PROFILES, record, &mut report))
            .collect();

        for remote in remotes.iter().filter(|remote| remote.deleted) {
            let db = self.db.lock().await;
            let repo = LibSqlProfileRepository::new(db.connection());
            match repo.find_by_remote_id(&remote.id).await? {
                Some(local) if !local.sync.deleted => {
                    repo.apply_remote_tombstone(&local.local_id, remote.updated_at)
                        .await?;
                    report.updated += 1;
                }
                _ => report.ignored += 1,
            }
        }

        for candidate in preferred_by_name(remotes).into_values() {
            self.merge_profile(candidate, &mut report).await?;
        }
        self.collapse_duplicate_profiles().await?;

        tracing::info!(
            "Pulled profiles: {} updated, {} ignored, {} skipped",
            report.updated,
            report.ignored,
            report.skipped
        );
        Ok(report)
    }

    async fn merge_profile(&self, candidate: Candidate, report: &mut PullReport) -> Result<()> {
        let Candidate { remote, profile } = candidate;
        let db = self.db.lock().await;
        let repo = LibSqlProfileRepository::new(db.connection());

        let local = match repo.find_by_remote_id(&remote.id).await? {
            Some(local) if !local.sync.deleted => Some(local),
            Some(_) => {
                report.ignored += 1;
                return Ok(());
            }
            None => repo
                .find_by_name(&profile.name)
                .await?
                .into_iter()
                .reduce(|best, next| {
                    if prefer_local_profile(&next, &best) {
                        next
                    } else {
                        best
                    }
                }),
        };

        let Some(local) = local else {
            tracing::debug!("Profile {}: inserting remote {}", profile.name, remote.id);
            repo.upsert(&profile).await?;
            report.updated += 1;
            return Ok(());
        };

        let local_tiebreak = local
            .sync
            .remote_id
            .clone()
            .unwrap_or_else(|| local.local_id.to_string());
        if prefer_profile((&profile, &remote.id), (&local, &local_tiebreak)) {
            tracing::debug!("Profile {}: remote {} wins", profile.name, remote.id);
            let mut merged = remote.to_profile(local.local_id.clone());
            merged.created_at = local.created_at;
            merged.sync.updated_at = merged.sync.updated_at.max(local.sync.updated_at);
            repo.upsert(&merged).await?;
            report.updated += 1;
            return Ok(());
        }

        if local.sync.remote_id.is_none() {
            let mut linked = local.clone();
            linked.sync.remote_id = Some(remote.id.clone());
            repo.upsert(&linked).await?;
        }
        report.ignored += 1;
        if remote.updated_at > local.sync.updated_at {
            drop(db);
            self.record_conflict(
                AI_PROFILES,
                local.name.trim(),
                local.sync.updated_at,
                remote.updated_at,
                ConflictWinner::Local,
            )
            .await;
        }
        Ok(())
    }

    /// Keep one live profile per name and repoint the active profile at the survivor.
    async fn collapse_duplicate_profiles(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlProfileRepository::new(db.connection());
        let mut survivors: HashMap<String, AiProfile> = HashMap::new();
        let mut losers = Vec::new();
        for profile in repo.list().await? {
            let key = profile.name_key();
            match survivors.remove(&key) {
                Some(current) if prefer_local_profile(&profile, &current) => {
                    losers.push(current);
                    survivors.insert(key, profile);
                }
                Some(current) => {
                    losers.push(profile);
                    survivors.insert(key, current);
                }
                None => {
                    survivors.insert(key, profile);
                }
            }
        }
        if losers.is_empty() {
            return Ok(0);
        }

        let settings_repo = LibSqlSettingsRepository::new(db.connection());
        let mut settings = settings_repo.load().await?;
        let mut settings_changed = false;
        for loser in &losers {
            let Some(winner) = survivors.get(&loser.name_key()) else {
                continue;
            };
            tracing::info!("Collapsing duplicate profile {}", loser.name.trim());
            repo.delete(&loser.local_id).await?;
            let active = settings.active_profile_remote_id.as_deref();
            if active.is_some() && active == loser.sync.remote_id.as_deref() {
                settings.active_profile_remote_id = winner.sync.remote_id.clone();
                settings_changed = true;
            }
        }
        if settings_changed {
            settings.sync.touch(now_millis());
            settings_repo.save(&settings).await?;
        }
        Ok(losers.len())
    }
}
