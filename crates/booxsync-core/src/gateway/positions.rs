//! Reading positions. One progress record per book and user.

use super::records::{self, RemotePosition, PROGRESS};
use super::rest::{key_filter, user_filter};
use super::{
    decide, decode, LocalClock, MergeDecision, PullReport, PushOutcome, PushReport, PushRequest,
    SyncGateway,
};
use crate::db::{
    LibSqlLibraryRepository, LibSqlPositionRepository, LibraryRepository, PositionRepository,
};
use crate::models::{ConflictWinner, Locator, ReadingPosition};
use crate::{Error, Result};

impl SyncGateway {
    pub async fn push_position(&self, book_key: &str) -> Result<PushOutcome> {
        let user_id = self.user_id().await?;
        let position = self
            .db
            .get_position(book_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Position for {book_key}")))?;
        let title = self
            .db
            .get_library_item(book_key)
            .await?
            .and_then(|item| item.title);

        let filter = key_filter(&user_id, "bookId", book_key);
        // Progress has no uniqueness constraint on every backend, so look before creating.
        let remote_id = match &position.remote_id {
            Some(id) => Some(id.clone()),
            None => self
                .rest
                .find_one(PROGRESS, &filter)
                .await?
                .and_then(|record| record.get("id")?.as_str().map(str::to_string)),
        };

        let request = PushRequest {
            collection: PROGRESS,
            record_key: book_key,
            remote_id: remote_id.as_deref(),
            key_filter: Some(filter.clone()),
            updated_at: position.updated_at,
            deleted: false,
            payload: records::position_payload(&user_id, &position, title.as_deref()),
        };
        let (outcome, _) = self.push_record(request).await?;

        let db = self.db.lock().await;
        LibSqlPositionRepository::new(db.connection())
            .mark_synced(book_key, outcome.remote_id(), position.updated_at)
            .await?;
        Ok(outcome)
    }

    pub async fn push_pending_positions(&self) -> Result<PushReport> {
        let pending = {
            let db = self.db.lock().await;
            LibSqlPositionRepository::new(db.connection())
                .list_unsynced()
                .await?
        };
        let mut report = PushReport::default();
        for position in pending {
            let result = self.push_position(&position.book_key).await;
            report.tally(PROGRESS, &position.book_key, result)?;
        }
        Ok(report)
    }

    pub async fn pull_positions(&self) -> Result<PullReport> {
        let user_id = self.user_id().await?;
        let remote = self.rest.list(PROGRESS, &user_filter(&user_id)).await?;
        let mut report = PullReport::default();
        for record in remote {
            if let Some(position) = decode::<RemotePosition>(PROGRESS, record, &mut report) {
                self.merge_position(position, &mut report).await?;
            }
        }
        tracing::info!(
            "Pulled positions: {} updated, {} ignored, {} skipped",
            report.updated,
            report.ignored,
            report.skipped
        );
        Ok(report)
    }

    pub async fn pull_position(&self, book_key: &str) -> Result<PullReport> {
        let user_id = self.user_id().await?;
        let mut report = PullReport::default();
        let filter = key_filter(&user_id, "bookId", book_key);
        if let Some(record) = self.rest.find_one(PROGRESS, &filter).await? {
            if let Some(position) = decode::<RemotePosition>(PROGRESS, record, &mut report) {
                self.merge_position(position, &mut report).await?;
            }
        }
        Ok(report)
    }

    /// Drop the local position of `book_key` after its progress record was
    /// deleted remotely. A position linked to a different record is kept.
    pub async fn apply_position_delete(&self, book_key: &str, remote_id: Option<&str>) -> Result<bool> {
        let db = self.db.lock().await;
        let positions = LibSqlPositionRepository::new(db.connection());
        let Some(local) = positions.get(book_key).await? else {
            return Ok(false);
        };
        if remote_id.is_some() && local.remote_id.as_deref() != remote_id {
            return Ok(false);
        }
        positions.delete(book_key).await?;
        tracing::debug!("Progress for {} deleted remotely", book_key);
        Ok(true)
    }

    async fn merge_position(&self, remote: RemotePosition, report: &mut PullReport) -> Result<()> {
        let locator = match Locator::parse(remote.locator_json.clone()) {
            Ok(locator) => locator,
            Err(error) => {
                tracing::warn!("Skipping progress {} with bad locator: {}", remote.id, error);
                report.skipped += 1;
                return Ok(());
            }
        };
        let book_key = remote.book_id.trim();

        let db = self.db.lock().await;
        let positions = LibSqlPositionRepository::new(db.connection());
        let local = positions.get(book_key).await?;
        let decision = decide(
            local
                .as_ref()
                .map(|position| LocalClock::new(position.updated_at, false)),
            remote.updated_at,
            false,
        );
        tracing::debug!("Position {}: {:?}", book_key, decision);

        match decision {
            MergeDecision::Insert | MergeDecision::ApplyRemote => {
                let mut position = ReadingPosition::new(book_key, locator, remote.updated_at);
                if let Some(local) = &local {
                    position.local_id = local.local_id.clone();
                }
                position.remote_id = Some(remote.id.clone());
                position.is_synced = true;
                positions.upsert(&position).await?;

                let library = LibSqlLibraryRepository::new(db.connection());
                if let Some(mut item) = library.get(book_key).await? {
                    if item.apply_position(&position) {
                        library.upsert(&item).await?;
                    }
                }
            }
            MergeDecision::KeepLocal => {
                drop(db);
                if let Some(local) = &local {
                    self.record_conflict(
                        PROGRESS,
                        book_key,
                        local.updated_at,
                        remote.updated_at,
                        ConflictWinner::Local,
                    )
                    .await;
                }
            }
            MergeDecision::ApplyTombstone | MergeDecision::Unchanged => {
                if local.as_ref().is_some_and(|position| position.remote_id.is_none()) {
                    positions
                        .mark_synced(book_key, &remote.id, remote.updated_at)
                        .await?;
                }
            }
        }
        report.count(decision);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use httpmock::Method::PATCH;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    use super::super::test_support::gateway;
    use super::*;

    const RECORDS: &str = "/api/collections/progress/records";
    const LOCATOR: &str = r#"{"href":"c3.xhtml","type":"application/xhtml+xml","locations":{"progression":0.5,"totalProgression":0.25}}"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_folds_newer_position_into_book() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        let gateway = gateway(&server, dir.path()).await;
        gateway
            .database()
            .import_book("k1", None, dir.path().join("a.epub"))
            .await
            .unwrap();
        let later = crate::util::now_millis() + 60_000;

        server
            .mock_async(move |when, then| {
                when.method(GET).path(RECORDS);
                then.status(200).json_body(json!({
                    "page": 1,
                    "totalPages": 1,
                    "items": [{ "id": "p1", "bookId": "k1", "locatorJson": LOCATOR, "updatedAt": later }]
                }));
            })
            .await;

        let report = gateway.pull_positions().await.unwrap();

        assert_eq!(report.updated, 1);
        let position = gateway.database().get_position("k1").await.unwrap().unwrap();
        assert_eq!(position.remote_id.as_deref(), Some("p1"));
        assert!(position.is_synced);
        let item = gateway.database().get_library_item("k1").await.unwrap().unwrap();
        assert_eq!(item.last_locator.unwrap().as_str(), LOCATOR);
        assert_eq!(item.last_opened_at, later);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_reuses_existing_progress_record() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        let gateway = gateway(&server, dir.path()).await;
        let position = gateway
            .database()
            .record_position("k1", Locator::parse(LOCATOR).unwrap())
            .await
            .unwrap();

        server
            .mock_async(|when, then| {
                when.method(GET).path(RECORDS);
                then.status(200).json_body(json!({
                    "page": 1,
                    "totalPages": 1,
                    "items": [{ "id": "p1", "bookId": "k1", "locatorJson": "{}", "updatedAt": 1 }]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("{RECORDS}/p1"));
                then.status(200)
                    .json_body(json!({ "id": "p1", "bookId": "k1", "updatedAt": 1 }));
            })
            .await;
        let update = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path(format!("{RECORDS}/p1"))
                    .json_body_partial(format!(r#"{{"locatorJson":{}}}"#, json!(LOCATOR)));
                then.status(200).json_body(json!({ "id": "p1" }));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST).path(RECORDS);
                then.status(200).json_body(json!({ "id": "other" }));
            })
            .await;

        let outcome = gateway.push_position("k1").await.unwrap();

        assert_eq!(outcome, PushOutcome::Updated("p1".into()));
        update.assert_async().await;
        assert_eq!(create.hits_async().await, 0);
        let stored = gateway.database().get_position("k1").await.unwrap().unwrap();
        assert_eq!(stored.updated_at, position.updated_at);
        assert!(stored.is_synced);
    }
}
