//! Remote sync gateway.
//!
//! Per-entity push and pull against the backend's record collections. Every
//! push reads the remote copy first when one is known, so a remote tombstone
//! or a newer remote edit is never overwritten by a stale local write. Pulls
//! run each record through [`merge::decide`] and apply the result through the
//! local repositories.

mod bookmarks;
mod library;
mod merge;
mod notes;
mod positions;
mod profiles;
pub mod records;
pub mod rest;
mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::Authenticator;
use crate::config::ClientConfig;
use crate::db::{ConflictRepository, LibSqlConflictRepository};
use crate::models::ConflictWinner;
use crate::services::DatabaseService;
use crate::storage::ObjectStorageClient;
use crate::{Error, ErrorKind, Result};

pub use merge::{decide, prefer_local_profile, prefer_profile, LocalClock, MergeDecision};
pub use rest::{Created, RestClient};

/// How a push reached the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// A new remote record was created
    Created(String),
    /// The known remote record was overwritten
    Updated(String),
    /// A create collided with an existing record for the same key, which was adopted
    Adopted(String),
    /// The remote copy is newer; the local write was not sent
    SkippedStale {
        remote_id: String,
        remote_updated_at: i64,
    },
    /// The remote copy is a tombstone; the local record was tombstoned instead
    RemoteDeleted { remote_id: String, deleted_at: i64 },
}

impl PushOutcome {
    pub fn remote_id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Updated(id) | Self::Adopted(id) => id,
            Self::SkippedStale { remote_id, .. } | Self::RemoteDeleted { remote_id, .. } => {
                remote_id
            }
        }
    }

    /// Whether local state was written to the backend.
    pub const fn wrote(&self) -> bool {
        matches!(self, Self::Created(_) | Self::Updated(_) | Self::Adopted(_))
    }
}

/// Counts from one pull
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Records inserted, overwritten or tombstoned locally
    pub updated: usize,
    /// Malformed records that could not be merged
    pub skipped: usize,
    /// Records where local state was kept
    pub ignored: usize,
}

impl PullReport {
    pub fn merge(&mut self, other: Self) {
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.ignored += other.ignored;
    }

    fn count(&mut self, decision: MergeDecision) {
        if decision.applies() {
            self.updated += 1;
        } else {
            self.ignored += 1;
        }
    }
}

/// Counts from one push pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub pushed: usize,
    pub stale: usize,
    pub failed: usize,
}

impl PushReport {
    pub fn merge(&mut self, other: Self) {
        self.pushed += other.pushed;
        self.stale += other.stale;
        self.failed += other.failed;
    }

    /// Count one push result. Authentication failures abort the pass.
    fn tally(&mut self, collection: &str, key: &str, result: Result<PushOutcome>) -> Result<()> {
        match result {
            Ok(outcome) if outcome.wrote() => self.pushed += 1,
            Ok(_) => self.stale += 1,
            Err(error) if error.kind() == ErrorKind::AuthFailure => return Err(error),
            Err(error) => {
                tracing::warn!("Failed to push {} {}: {}", collection, key, error);
                self.failed += 1;
            }
        }
        Ok(())
    }
}

/// One record on its way to the backend
struct PushRequest<'a> {
    collection: &'static str,
    /// Local key used in logs and the conflict log
    record_key: &'a str,
    remote_id: Option<&'a str>,
    /// Filter locating the same logical record when a create collides
    key_filter: Option<String>,
    updated_at: i64,
    deleted: bool,
    payload: Value,
}

/// Per-entity push and pull against the backend.
pub struct SyncGateway {
    rest: RestClient,
    storage: ObjectStorageClient,
    db: DatabaseService,
    library_dir: PathBuf,
}

impl SyncGateway {
    pub fn new(config: &ClientConfig, authenticator: Arc<Authenticator>, db: DatabaseService) -> Self {
        Self {
            rest: RestClient::new(
                &config.backend_url,
                Arc::clone(&authenticator),
                config.page_size,
            ),
            storage: ObjectStorageClient::new(
                &config.backend_url,
                records::BOOKS,
                authenticator,
                config.download_timeout,
            ),
            db,
            library_dir: config.library_dir.clone(),
        }
    }

    pub const fn database(&self) -> &DatabaseService {
        &self.db
    }

    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    /// Id of the signed-in account.
    async fn user_id(&self) -> Result<String> {
        self.db
            .load_account()
            .await?
            .map(|user| user.id)
            .ok_or_else(|| Error::Unauthenticated("No signed-in account".to_string()))
    }

    /// Write one record, returning the outcome and the remote record as last seen.
    async fn push_record(&self, request: PushRequest<'_>) -> Result<(PushOutcome, Value)> {
        let collection = request.collection;
        if let Some(remote_id) = request.remote_id {
            match self.rest.get(collection, remote_id).await? {
                Some(existing) => return self.push_over(&request, existing, false).await,
                None => tracing::info!(
                    "Remote {} record {} is gone, recreating {}",
                    collection,
                    remote_id,
                    request.record_key
                ),
            }
        }

        match self.rest.create(collection, &request.payload).await? {
            Created::Record(record) => {
                let id = record_id(&record)?;
                tracing::debug!("Created {} {} as {}", collection, request.record_key, id);
                Ok((PushOutcome::Created(id), record))
            }
            Created::Duplicate => {
                let existing = match &request.key_filter {
                    Some(filter) => self.rest.find_one(collection, filter).await?,
                    None => None,
                };
                let existing = existing.ok_or_else(|| Error::Api {
                    status: 409,
                    message: format!(
                        "{collection} {} collided with a record that cannot be found",
                        request.record_key
                    ),
                })?;
                self.push_over(&request, existing, true).await
            }
        }
    }

    /// Overwrite an existing remote record unless it is a tombstone or newer.
    async fn push_over(
        &self,
        request: &PushRequest<'_>,
        existing: Value,
        adopted: bool,
    ) -> Result<(PushOutcome, Value)> {
        let meta: records::RemoteMeta = serde_json::from_value(existing.clone())?;
        let collection = request.collection;

        if meta.deleted && !request.deleted {
            tracing::info!(
                "{} {} was deleted remotely, dropping local edit",
                collection,
                request.record_key
            );
            let outcome = PushOutcome::RemoteDeleted {
                remote_id: meta.id,
                deleted_at: meta.updated_at,
            };
            return Ok((outcome, existing));
        }

        if meta.updated_at > request.updated_at {
            tracing::debug!(
                "{} {} is newer remotely ({} > {}), skipping push",
                collection,
                request.record_key,
                meta.updated_at,
                request.updated_at
            );
            self.record_conflict(
                collection,
                request.record_key,
                request.updated_at,
                meta.updated_at,
                ConflictWinner::Remote,
            )
            .await;
            let outcome = PushOutcome::SkippedStale {
                remote_id: meta.id,
                remote_updated_at: meta.updated_at,
            };
            return Ok((outcome, existing));
        }

        let record = self.rest.update(collection, &meta.id, &request.payload).await?;
        let outcome = if adopted {
            tracing::debug!("Adopted {} {} as {}", collection, request.record_key, meta.id);
            PushOutcome::Adopted(meta.id)
        } else {
            PushOutcome::Updated(meta.id)
        };
        Ok((outcome, record))
    }

    /// Log a conflict for diagnostics. Failures are not fatal to the sync pass.
    async fn record_conflict(
        &self,
        collection: &str,
        record_key: &str,
        local_updated_at: i64,
        incoming_updated_at: i64,
        winner: ConflictWinner,
    ) {
        let db = self.db.lock().await;
        let result = LibSqlConflictRepository::new(db.connection())
            .record(
                collection,
                record_key,
                local_updated_at,
                incoming_updated_at,
                winner,
            )
            .await;
        if let Err(error) = result {
            tracing::warn!("Failed to log {} conflict for {}: {}", collection, record_key, error);
        }
    }
}

fn record_id(record: &Value) -> Result<String> {
    record
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidInput("Backend record has no id".to_string()))
}

/// Decode one listed record, logging and skipping it when malformed.
fn decode<T: DeserializeOwned>(collection: &str, record: Value, report: &mut PullReport) -> Option<T> {
    match serde_json::from_value(record) {
        Ok(decoded) => Some(decoded),
        Err(error) => {
            tracing::warn!("Skipping malformed {} record: {}", collection, error);
            report.skipped += 1;
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use httpmock::MockServer;
    use reqwest::Client;

    use super::SyncGateway;
    use crate::auth::{Authenticator, MemoryTokenStore, SessionUser, TokenStore};
    use crate::config::ClientConfig;
    use crate::services::DatabaseService;

    pub const USER: &str = "u1";

    /// Gateway signed in as [`USER`] against `server`, with its sandbox in `library_dir`.
    pub async fn gateway(server: &MockServer, library_dir: &std::path::Path) -> SyncGateway {
        let store = Arc::new(MemoryTokenStore::default());
        store.save_access_token("token").unwrap();
        let auth = Arc::new(Authenticator::new(Client::new(), &server.base_url(), store));
        let config = ClientConfig::new(&server.base_url(), library_dir.to_path_buf()).unwrap();
        let db = DatabaseService::open_in_memory().await.unwrap();
        db.save_account(&SessionUser {
            id: USER.to_string(),
            email: None,
        })
        .await
        .unwrap();
        SyncGateway::new(&config, auth, db)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn push_report_counts_outcomes() {
        let mut report = PushReport::default();
        report
            .tally("books", "a", Ok(PushOutcome::Created("r1".into())))
            .unwrap();
        report
            .tally(
                "books",
                "b",
                Ok(PushOutcome::SkippedStale {
                    remote_id: "r2".into(),
                    remote_updated_at: 5,
                }),
            )
            .unwrap();
        report
            .tally("books", "c", Err(Error::Storage("disk".into())))
            .unwrap();

        assert_eq!(
            report,
            PushReport {
                pushed: 1,
                stale: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn auth_failure_aborts_push_pass() {
        let mut report = PushReport::default();
        let result = report.tally(
            "books",
            "a",
            Err(Error::Unauthenticated("refresh rejected".into())),
        );
        assert!(result.is_err());
    }

    #[test]
    fn outcome_exposes_remote_id() {
        let outcome = PushOutcome::RemoteDeleted {
            remote_id: "r9".into(),
            deleted_at: 10,
        };
        assert_eq!(outcome.remote_id(), "r9");
        assert!(!outcome.wrote());
    }
}
