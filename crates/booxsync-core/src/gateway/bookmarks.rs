//! Bookmarks, matched by remote id or by position within a book.

use super::records::{self, RemoteBookmark, BOOKMARKS};
use super::rest::{key_filter, quote, user_filter};
use super::{
    decide, decode, LocalClock, MergeDecision, PullReport, PushOutcome, PushReport, PushRequest,
    SyncGateway,
};
use crate::db::{BookmarkRepository, LibSqlBookmarkRepository};
use crate::models::{Bookmark, ConflictWinner, LocalId, Locator, SyncMeta};
use crate::{Error, Result};

fn bookmark_filter(user_id: &str, bookmark: &Bookmark) -> String {
    format!(
        "(user={} && bookId={} && locatorJson={})",
        quote(user_id),
        quote(&bookmark.book_key),
        quote(bookmark.locator.as_str())
    )
}

impl SyncGateway {
    pub async fn push_bookmark(&self, id: &LocalId) -> Result<PushOutcome> {
        let user_id = self.user_id().await?;
        let bookmark = self
            .db
            .get_bookmark(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Bookmark {id}")))?;
        let record_key = id.to_string();

        let request = PushRequest {
            collection: BOOKMARKS,
            record_key: &record_key,
            remote_id: bookmark.sync.remote_id.as_deref(),
            key_filter: Some(bookmark_filter(&user_id, &bookmark)),
            updated_at: bookmark.sync.updated_at,
            deleted: bookmark.sync.deleted,
            payload: records::bookmark_payload(&user_id, &bookmark),
        };
        let (outcome, _) = self.push_record(request).await?;

        let db = self.db.lock().await;
        let repo = LibSqlBookmarkRepository::new(db.connection());
        repo.mark_synced(id, outcome.remote_id(), bookmark.sync.updated_at)
            .await?;
        if let PushOutcome::RemoteDeleted { deleted_at, .. } = &outcome {
            repo.apply_remote_tombstone(id, *deleted_at).await?;
        }
        Ok(outcome)
    }

    pub async fn push_pending_bookmarks(&self) -> Result<PushReport> {
        let pending = {
            let db = self.db.lock().await;
            LibSqlBookmarkRepository::new(db.connection())
                .list_unsynced()
                .await?
        };
        let mut report = PushReport::default();
        for bookmark in pending {
            let result = self.push_bookmark(&bookmark.local_id).await;
            report.tally(BOOKMARKS, &bookmark.local_id.to_string(), result)?;
        }
        Ok(report)
    }

    pub async fn pull_bookmarks(&self) -> Result<PullReport> {
        let user_id = self.user_id().await?;
        let report = self.pull_bookmarks_matching(&user_filter(&user_id)).await?;
        tracing::info!(
            "Pulled bookmarks: {} updated, {} ignored, {} skipped",
            report.updated,
            report.ignored,
            report.skipped
        );
        Ok(report)
    }

    /// Pull the bookmarks of one book.
    pub async fn pull_bookmarks_for_book(&self, book_key: &str) -> Result<PullReport> {
        let user_id = self.user_id().await?;
        self.pull_bookmarks_matching(&key_filter(&user_id, "bookId", book_key))
            .await
    }

    /// Tombstone the bookmark linked to `remote_id` after a remote delete.
    ///
    /// Returns false when no live local bookmark is linked to it.
    pub async fn apply_bookmark_tombstone(&self, remote_id: &str, deleted_at: i64) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlBookmarkRepository::new(db.connection());
        match repo.find_by_remote_id(remote_id).await? {
            Some(bookmark) if !bookmark.sync.deleted => {
                repo.apply_remote_tombstone(&bookmark.local_id, deleted_at)
                    .await?;
                tracing::debug!("Bookmark {} deleted remotely", remote_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pull_bookmarks_matching(&self, filter: &str) -> Result<PullReport> {
        let remote = self.rest.list(BOOKMARKS, filter).await?;
        let mut report = PullReport::default();
        for record in remote {
            if let Some(bookmark) = decode::<RemoteBookmark>(BOOKMARKS, record, &mut report) {
                self.merge_bookmark(bookmark, &mut report).await?;
            }
        }
        Ok(report)
    }

    async fn merge_bookmark(&self, remote: RemoteBookmark, report: &mut PullReport) -> Result<()> {
        let locator = match Locator::parse(remote.locator_json.clone()) {
            Ok(locator) => locator,
            Err(error) => {
                tracing::warn!("Skipping bookmark {} with bad locator: {}", remote.id, error);
                report.skipped += 1;
                return Ok(());
            }
        };
        let book_key = remote.book_id.trim().to_string();

        let db = self.db.lock().await;
        let repo = LibSqlBookmarkRepository::new(db.connection());
        let local = match repo.find_by_remote_id(&remote.id).await? {
            Some(found) => Some(found),
            None => repo.find_unlinked(&book_key, &locator).await?,
        };
        let decision = decide(
            local
                .as_ref()
                .map(|bookmark| LocalClock::new(bookmark.sync.updated_at, bookmark.sync.deleted)),
            remote.updated_at,
            remote.deleted,
        );
        tracing::debug!("Bookmark {}: {:?}", remote.id, decision);

        match decision {
            MergeDecision::Insert | MergeDecision::ApplyRemote => {
                let bookmark = Bookmark {
                    local_id: local
                        .as_ref()
                        .map_or_else(LocalId::new, |bookmark| bookmark.local_id.clone()),
                    book_key,
                    locator,
                    highlight: remote.highlight.clone(),
                    created_at: if remote.created_at > 0 {
                        remote.created_at
                    } else {
                        remote.updated_at
                    },
                    sync: SyncMeta::from_remote(&remote.id, remote.updated_at, false),
                };
                repo.upsert(&bookmark).await?;
            }
            MergeDecision::ApplyTombstone => {
                if let Some(local) = &local {
                    repo.apply_remote_tombstone(&local.local_id, remote.updated_at)
                        .await?;
                }
            }
            MergeDecision::KeepLocal => {
                if let Some(local) = &local {
                    if local.sync.remote_id.is_none() {
                        let mut linked = local.clone();
                        linked.sync.remote_id = Some(remote.id.clone());
                        repo.upsert(&linked).await?;
                    }
                    drop(db);
                    self.record_conflict(
                        BOOKMARKS,
                        &local.local_id.to_string(),
                        local.sync.updated_at,
                        remote.updated_at,
                        ConflictWinner::Local,
                    )
                    .await;
                }
            }
            MergeDecision::Unchanged => {
                if let Some(local) = local.as_ref().filter(|local| local.sync.remote_id.is_none()) {
                    repo.mark_synced(&local.local_id, &remote.id, remote.updated_at)
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

    const RECORDS: &str = "/api/collections/bookmarks/records";
    const LOCATOR: &str = r#"{"href":"c1.xhtml","locations":{"progression":0.1}}"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_links_matching_unpushed_bookmark() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        let gateway = gateway(&server, dir.path()).await;
        let local = gateway
            .database()
            .add_bookmark("k1", Locator::parse(LOCATOR).unwrap(), Some("old".into()))
            .await
            .unwrap();
        let later = local.sync.updated_at + 1;

        server
            .mock_async(move |when, then| {
                when.method(GET).path(RECORDS);
                then.status(200).json_body(json!({
                    "page": 1,
                    "totalPages": 1,
                    "items": [{
                        "id": "b1",
                        "bookId": "k1",
                        "locatorJson": LOCATOR,
                        "highlight": "new",
                        "updatedAt": later,
                    }]
                }));
            })
            .await;

        let report = gateway.pull_bookmarks().await.unwrap();

        assert_eq!(report.updated, 1);
        let bookmarks = gateway.database().list_bookmarks("k1").await.unwrap();
        assert_eq!(bookmarks.len(), 1);
        assert_eq!(bookmarks[0].local_id, local.local_id);
        assert_eq!(bookmarks[0].highlight.as_deref(), Some("new"));
        assert_eq!(bookmarks[0].sync.remote_id.as_deref(), Some("b1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deleted_bookmark_push_sends_tombstone() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        let gateway = gateway(&server, dir.path()).await;
        let bookmark = gateway
            .database()
            .add_bookmark("k1", Locator::parse(LOCATOR).unwrap(), None)
            .await
            .unwrap();

        let create = server
            .mock_async(|when, then| {
                when.method(POST).path(RECORDS);
                then.status(200).json_body(json!({ "id": "b1" }));
            })
            .await;
        gateway.push_bookmark(&bookmark.local_id).await.unwrap();
        create.assert_async().await;

        let deleted = gateway.database().delete_bookmark(&bookmark.local_id).await.unwrap();
        let clock = deleted.sync.updated_at - 1;
        server
            .mock_async(move |when, then| {
                when.method(GET).path(format!("{RECORDS}/b1"));
                then.status(200)
                    .json_body(json!({ "id": "b1", "bookId": "k1", "updatedAt": clock }));
            })
            .await;
        let tombstone = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path(format!("{RECORDS}/b1"))
                    .json_body_partial(r#"{"deleted":true}"#);
                then.status(200).json_body(json!({ "id": "b1", "deleted": true }));
            })
            .await;

        let outcome = gateway.push_bookmark(&bookmark.local_id).await.unwrap();

        assert_eq!(outcome, PushOutcome::Updated("b1".into()));
        tombstone.assert_async().await;
        let stored = gateway.database().get_bookmark(&bookmark.local_id).await.unwrap().unwrap();
        assert!(stored.sync.deleted);
        assert!(stored.sync.is_synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_over_newer_remote_is_skipped_and_logged() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        let gateway = gateway(&server, dir.path()).await;
        let mut bookmark = Bookmark::new("k1", Locator::parse(LOCATOR).unwrap(), Some("mine".into()));
        bookmark.sync.remote_id = Some("b1".into());
        {
            let db = gateway.database().lock().await;
            LibSqlBookmarkRepository::new(db.connection())
                .upsert(&bookmark)
                .await
                .unwrap();
        }
        let remote_clock = bookmark.sync.updated_at + 60_000;

        server
            .mock_async(move |when, then| {
                when.method(GET).path(format!("{RECORDS}/b1"));
                then.status(200).json_body(json!({
                    "id": "b1",
                    "bookId": "k1",
                    "locatorJson": LOCATOR,
                    "highlight": "theirs",
                    "updatedAt": remote_clock,
                }));
            })
            .await;
        let patch = server
            .mock_async(|when, then| {
                when.method(PATCH).path(format!("{RECORDS}/b1"));
                then.status(200).json_body(json!({ "id": "b1" }));
            })
            .await;

        let outcome = gateway.push_bookmark(&bookmark.local_id).await.unwrap();

        assert_eq!(
            outcome,
            PushOutcome::SkippedStale {
                remote_id: "b1".into(),
                remote_updated_at: remote_clock,
            }
        );
        assert_eq!(patch.hits_async().await, 0);
        let conflicts = gateway.database().list_conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].collection, BOOKMARKS);
        assert_eq!(conflicts[0].record_key, bookmark.local_id.to_string());
        assert_eq!(conflicts[0].local_updated_at, bookmark.sync.updated_at);
        assert_eq!(conflicts[0].incoming_updated_at, remote_clock);
        assert_eq!(conflicts[0].winner, ConflictWinner::Remote);
        let stored = gateway.database().get_bookmark(&bookmark.local_id).await.unwrap().unwrap();
        assert!(stored.sync.is_synced);
        assert_eq!(stored.highlight.as_deref(), Some("mine"));
    }
}
