//! Composition root of the sync engine.
//!
//! [`SyncOrchestrator`] wires the authenticator, gateway and streaming client
//! to one local store and exposes the passes a UI drives: a full pull on
//! login, `sync_now` on manual refresh, and best-effort pushes after local
//! edits.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use crate::auth::{AuthClient, Authenticator, SessionUser, TokenStore};
use crate::config::ClientConfig;
use crate::gateway::records::{AI_NOTES, BOOKMARKS, BOOKS, PROGRESS};
use crate::gateway::{PullReport, PushOutcome, PushReport, SyncGateway};
use crate::models::{AiNote, Bookmark, LibraryItem, LocalId, Locator, ReadingPosition, Settings};
use crate::realtime::{ChangeAction, ListenerEvent, RealtimeListener};
use crate::services::DatabaseService;
use crate::streaming::StreamingClient;
use crate::util::now_millis;
use crate::{Error, Result};

/// Collections the realtime listener subscribes to
const WATCHED_TABLES: [&str; 4] = [BOOKS, PROGRESS, BOOKMARKS, AI_NOTES];

/// Pull and push counts of one entity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntitySummary {
    pub pulled: PullReport,
    pub pushed: PushReport,
}

impl EntitySummary {
    fn merge(&mut self, other: Self) {
        self.pulled.merge(other.pulled);
        self.pushed.merge(other.pushed);
    }
}

/// Result of a reconciliation pass, per entity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub profiles: EntitySummary,
    pub settings: EntitySummary,
    pub library: EntitySummary,
    pub notes: EntitySummary,
    pub positions: EntitySummary,
    pub bookmarks: EntitySummary,
    /// Acknowledged tombstones removed after the push
    pub purged: u64,
}

impl SyncSummary {
    /// Entity summaries in sync order, labelled for display.
    pub const fn entities(&self) -> [(&'static str, &EntitySummary); 6] {
        [
            ("profiles", &self.profiles),
            ("settings", &self.settings),
            ("library", &self.library),
            ("notes", &self.notes),
            ("positions", &self.positions),
            ("bookmarks", &self.bookmarks),
        ]
    }

    pub fn merge(&mut self, other: Self) {
        self.profiles.merge(other.profiles);
        self.settings.merge(other.settings);
        self.library.merge(other.library);
        self.notes.merge(other.notes);
        self.positions.merge(other.positions);
        self.bookmarks.merge(other.bookmarks);
        self.purged += other.purged;
    }
}

fn pulled(report: PullReport) -> EntitySummary {
    EntitySummary {
        pulled: report,
        ..EntitySummary::default()
    }
}

fn pushed(report: PushReport) -> EntitySummary {
    EntitySummary {
        pushed: report,
        ..EntitySummary::default()
    }
}

/// Sequences pulls and pushes across entity types for one account.
pub struct SyncOrchestrator {
    config: ClientConfig,
    authenticator: Arc<Authenticator>,
    auth: AuthClient,
    gateway: Arc<SyncGateway>,
    streaming: StreamingClient,
    background: TaskTracker,
}

impl SyncOrchestrator {
    pub fn new(
        config: ClientConfig,
        tokens: Arc<dyn TokenStore>,
        db: DatabaseService,
    ) -> Result<Self> {
        let client = Client::builder().build()?;
        let authenticator = Arc::new(Authenticator::new(client, &config.backend_url, tokens));
        let auth = AuthClient::new(&config.backend_url, Arc::clone(&authenticator));
        let gateway = Arc::new(SyncGateway::new(&config, Arc::clone(&authenticator), db));
        let streaming = StreamingClient::new(Arc::clone(&authenticator));
        Ok(Self {
            config,
            authenticator,
            auth,
            gateway,
            streaming,
            background: TaskTracker::new(),
        })
    }

    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn gateway(&self) -> &SyncGateway {
        &self.gateway
    }

    pub fn database(&self) -> &DatabaseService {
        self.gateway.database()
    }

    pub const fn streaming(&self) -> &StreamingClient {
        &self.streaming
    }

    /// The signed-in account, if any.
    pub async fn current_user(&self) -> Result<Option<SessionUser>> {
        self.database().load_account().await
    }

    /// Sign in, then run a full pull.
    ///
    /// Signing in as a different account wipes the previous account's local
    /// state first. A failed pull is logged; the next `sync_now` retries it.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionUser> {
        let user = self.auth.sign_in(email, password).await?;
        let db = self.database();
        if let Some(previous) = db.load_account().await? {
            if previous.id != user.id {
                tracing::info!("Switching account, clearing local data");
                db.clear_user_data().await?;
                self.clear_library_dir().await?;
            }
        }
        db.save_account(&user).await?;
        tracing::info!("Signed in as {}", user.email.as_deref().unwrap_or(&user.id));

        if let Err(error) = self.pull_all().await {
            tracing::warn!("Initial pull after sign-in failed: {}", error);
        }
        Ok(user)
    }

    /// Forget tokens and wipe every local table and the library sandbox.
    pub async fn logout(&self) -> Result<()> {
        self.wait_for_background().await;
        self.auth.sign_out()?;
        self.database().clear_user_data().await?;
        self.clear_library_dir().await?;
        tracing::info!("Signed out and cleared local state");
        Ok(())
    }

    async fn clear_library_dir(&self) -> Result<()> {
        let dir = self.gateway.library_dir();
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Pull every entity type.
    ///
    /// Profiles, settings and the library are independent and pulled
    /// concurrently; notes, positions and bookmarks follow once the library
    /// exists locally.
    pub async fn pull_all(&self) -> Result<SyncSummary> {
        let gateway = &self.gateway;
        let (profiles, settings, library) = tokio::join!(
            gateway.pull_profiles(),
            gateway.pull_settings(),
            gateway.pull_books(),
        );
        let (profiles, settings, library) = (profiles?, settings?, library?);

        let (notes, positions, bookmarks) = tokio::join!(
            gateway.pull_notes(),
            gateway.pull_positions(),
            gateway.pull_bookmarks(),
        );

        let summary = SyncSummary {
            profiles: pulled(profiles),
            settings: pulled(settings),
            library: pulled(library),
            notes: pulled(notes?),
            positions: pulled(positions?),
            bookmarks: pulled(bookmarks?),
            purged: 0,
        };
        tracing::info!("Pull pass finished");
        Ok(summary)
    }

    /// Push every dirty record, then purge acknowledged tombstones.
    pub async fn push_local(&self) -> Result<SyncSummary> {
        let gateway = &self.gateway;
        let profiles = gateway.push_pending_profiles().await?;
        let settings = self.push_settings_if_dirty().await?;
        let library = gateway.push_pending_books().await?;
        let notes = gateway.push_pending_notes().await?;
        let positions = gateway.push_pending_positions().await?;
        let bookmarks = gateway.push_pending_bookmarks().await?;
        let purged = self.database().purge_synced_tombstones().await?;

        let summary = SyncSummary {
            profiles: pushed(profiles),
            settings: pushed(settings),
            library: pushed(library),
            notes: pushed(notes),
            positions: pushed(positions),
            bookmarks: pushed(bookmarks),
            purged,
        };
        tracing::info!("Push pass finished, purged {} tombstones", purged);
        Ok(summary)
    }

    async fn push_settings_if_dirty(&self) -> Result<PushReport> {
        let settings = self.database().load_settings().await?;
        let mut report = PushReport::default();
        // Settings never edited on this device have nothing to publish.
        if settings.sync.is_synced || settings.sync.updated_at == 0 {
            return Ok(report);
        }
        match self.gateway.push_settings().await {
            Ok(outcome) if outcome.wrote() => report.pushed += 1,
            Ok(_) => report.stale += 1,
            Err(error) if error.kind() == crate::ErrorKind::AuthFailure => return Err(error),
            Err(error) => {
                tracing::warn!("Failed to push settings: {}", error);
                report.failed += 1;
            }
        }
        Ok(report)
    }

    /// Manual refresh: pull everything, then push local changes.
    pub async fn sync_now(&self) -> Result<SyncSummary> {
        let mut summary = self.pull_all().await?;
        summary.merge(self.push_local().await?);
        Ok(summary)
    }

    // --- Best-effort local actions ---

    /// Run `push` in the background. Failures are logged and dropped.
    fn spawn_push<F, Fut>(&self, what: String, push: F)
    where
        F: FnOnce(Arc<SyncGateway>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<PushOutcome>> + Send + 'static,
    {
        let gateway = Arc::clone(&self.gateway);
        self.background.spawn(async move {
            match push(gateway).await {
                Ok(outcome) => tracing::debug!("Pushed {}: {:?}", what, outcome),
                Err(error) => tracing::warn!("Background push of {} failed: {}", what, error),
            }
        });
    }

    /// Wait until every background push spawned so far has finished.
    pub async fn wait_for_background(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    pub async fn record_progress(
        &self,
        book_key: &str,
        locator: Locator,
    ) -> Result<ReadingPosition> {
        let position = self.database().record_position(book_key, locator).await?;
        let key = book_key.to_string();
        self.spawn_push(format!("progress of {key}"), move |gateway| async move {
            gateway.push_position(&key).await
        });
        Ok(position)
    }

    pub async fn add_bookmark(
        &self,
        book_key: &str,
        locator: Locator,
        highlight: Option<String>,
    ) -> Result<Bookmark> {
        let bookmark = self
            .database()
            .add_bookmark(book_key, locator, highlight)
            .await?;
        let id = bookmark.local_id.clone();
        self.spawn_push(format!("bookmark {id}"), move |gateway| async move {
            gateway.push_bookmark(&id).await
        });
        Ok(bookmark)
    }

    pub async fn delete_bookmark(&self, id: &LocalId) -> Result<Bookmark> {
        let bookmark = self.database().delete_bookmark(id).await?;
        let id = id.clone();
        self.spawn_push(format!("bookmark {id}"), move |gateway| async move {
            gateway.push_bookmark(&id).await
        });
        Ok(bookmark)
    }

    pub async fn save_note(&self, note: &AiNote) -> Result<AiNote> {
        let saved = self.database().save_note(note).await?;
        let id = saved.local_id.clone();
        self.spawn_push(format!("note {id}"), move |gateway| async move {
            gateway.push_note(&id).await
        });
        Ok(saved)
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<Settings> {
        let saved = self.database().save_settings(settings).await?;
        self.spawn_push("settings".to_string(), |gateway| async move {
            gateway.push_settings().await
        });
        Ok(saved)
    }

    pub async fn delete_book(&self, book_key: &str) -> Result<LibraryItem> {
        let item = self.database().delete_book(book_key).await?;
        let key = book_key.to_string();
        self.spawn_push(format!("book {key}"), move |gateway| async move {
            gateway.push_book(&key).await
        });
        Ok(item)
    }

    /// Path of a readable file for `book_key`, downloading it if needed.
    pub async fn open_book(&self, book_key: &str) -> Result<PathBuf> {
        self.gateway.ensure_book_file_available(book_key).await
    }

    pub fn library_dir(&self) -> &Path {
        self.gateway.library_dir()
    }

    // --- Realtime ---

    /// Build a listener for the signed-in account.
    ///
    /// Returns `Ok(None)` when no realtime endpoint is configured. The caller
    /// starts the listener and feeds its events to [`Self::dispatch`].
    pub async fn realtime_listener(
        &self,
    ) -> Result<Option<(Arc<RealtimeListener>, mpsc::UnboundedReceiver<ListenerEvent>)>> {
        let Some(realtime) = self.config.realtime.clone() else {
            return Ok(None);
        };
        let user = self
            .current_user()
            .await?
            .ok_or_else(|| Error::Unauthenticated("No signed-in account".to_string()))?;
        let tables = WATCHED_TABLES.iter().map(ToString::to_string).collect();
        Ok(Some(RealtimeListener::new(
            &self.config,
            realtime,
            tables,
            user.id,
            Arc::clone(self.authenticator.store()),
        )))
    }

    /// React to one listener event. Change failures are logged, never raised.
    pub async fn dispatch(&self, event: &ListenerEvent) {
        match event {
            ListenerEvent::Change(action) => {
                if let Err(error) = self.handle_change(action).await {
                    tracing::warn!(
                        "Failed to apply realtime change to {} {}: {}",
                        action.table(),
                        action.label(),
                        error
                    );
                }
            }
            ListenerEvent::ConnectionError(message) => {
                tracing::warn!("Realtime connection failed: {}", message);
            }
            ListenerEvent::StateChanged(state) => {
                tracing::debug!("Realtime listener is {:?}", state);
            }
        }
    }

    /// Apply one routed change: a point pull, or a local tombstone for a
    /// remote delete.
    pub async fn handle_change(&self, action: &ChangeAction) -> Result<PullReport> {
        let gateway = &self.gateway;
        let key = action.key();
        let record_id = action.record_id();
        let mut report = PullReport::default();
        let applied = match (action, action.table()) {
            (ChangeAction::Tombstone { .. }, BOOKS) if !key.is_empty() => {
                gateway.apply_book_tombstone(key, now_millis()).await?
            }
            (ChangeAction::Pull { .. }, BOOKS) if !key.is_empty() => {
                return gateway.pull_book(key).await;
            }
            (ChangeAction::Tombstone { .. }, PROGRESS) if !key.is_empty() => {
                gateway.apply_position_delete(key, record_id).await?
            }
            (ChangeAction::Pull { .. }, PROGRESS) if !key.is_empty() => {
                return gateway.pull_position(key).await;
            }
            (ChangeAction::Tombstone { .. }, BOOKMARKS) => match record_id {
                Some(id) => gateway.apply_bookmark_tombstone(id, now_millis()).await?,
                None => return gateway.pull_bookmarks_for_book(key).await,
            },
            (ChangeAction::Pull { .. }, BOOKMARKS) if !key.is_empty() => {
                return gateway.pull_bookmarks_for_book(key).await;
            }
            (ChangeAction::Tombstone { .. }, AI_NOTES) => match record_id {
                Some(id) => gateway.apply_note_tombstone(id, now_millis()).await?,
                None => return gateway.pull_notes_for_book(key).await,
            },
            (ChangeAction::Pull { .. }, AI_NOTES) => match record_id {
                Some(id) if key.is_empty() => return gateway.pull_note(id).await,
                _ => return gateway.pull_notes_for_book(key).await,
            },
            (_, table) => {
                tracing::debug!("Ignoring change to {} {}", table, action.label());
                false
            }
        };
        if applied {
            report.updated += 1;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::auth::MemoryTokenStore;
    use crate::db::{
        BookmarkRepository, LibSqlBookmarkRepository, LibSqlPositionRepository, PositionRepository,
    };

    const USER: &str = "u1";

    fn locator(href: &str) -> Locator {
        Locator::parse(format!(r#"{{"href":"{href}"}}"#)).unwrap()
    }

    async fn orchestrator(server: &MockServer, library_dir: &Path) -> SyncOrchestrator {
        let store: Arc<dyn TokenStore> = Arc::new(MemoryTokenStore::default());
        store.save_access_token("token").unwrap();
        let config = ClientConfig::new(&server.base_url(), library_dir.to_path_buf()).unwrap();
        let db = DatabaseService::open_in_memory().await.unwrap();
        db.save_account(&SessionUser {
            id: USER.to_string(),
            email: None,
        })
        .await
        .unwrap();
        SyncOrchestrator::new(config, store, db).unwrap()
    }

    async fn empty_collections(server: &MockServer) {
        server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/records");
                then.status(200)
                    .json_body(json!({ "page": 1, "totalPages": 1, "items": [] }));
            })
            .await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_now_pushes_dirty_records_and_purges_tombstones() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        empty_collections(&server).await;
        let create = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/collections/bookmarks/records")
                    .json_body_partial(r#"{"user":"u1","bookId":"book"}"#);
                then.status(200).json_body(json!({ "id": "b1" }));
            })
            .await;
        let orchestrator = orchestrator(&server, dir.path()).await;
        let db = orchestrator.database();
        let kept = db.add_bookmark("book", locator("c1"), None).await.unwrap();
        let dropped = db.add_bookmark("book", locator("c2"), None).await.unwrap();
        db.delete_bookmark(&dropped.local_id).await.unwrap();

        let summary = orchestrator.sync_now().await.unwrap();

        assert_eq!(create.hits_async().await, 2);
        assert_eq!(summary.bookmarks.pushed.pushed, 2);
        assert_eq!(summary.purged, 1);
        let stored = db.get_bookmark(&kept.local_id).await.unwrap().unwrap();
        assert_eq!(stored.sync.remote_id.as_deref(), Some("b1"));
        assert!(stored.sync.is_synced);
        assert!(db.get_bookmark(&dropped.local_id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn best_effort_push_failure_keeps_local_write() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        let create = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/collections/bookmarks/records");
                then.status(503).body("unavailable");
            })
            .await;
        let orchestrator = orchestrator(&server, dir.path()).await;

        let bookmark = orchestrator
            .add_bookmark("book", locator("c1"), Some("quote".into()))
            .await
            .unwrap();
        orchestrator.wait_for_background().await;

        assert_eq!(create.hits_async().await, 1);
        let stored = orchestrator
            .database()
            .get_bookmark(&bookmark.local_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.sync.is_synced);
        assert_eq!(stored.highlight.as_deref(), Some("quote"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn realtime_book_deletion_tombstones_locally() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(&server, dir.path()).await;
        let book = dir.path().join("book.epub");
        std::fs::write(&book, b"epub").unwrap();
        orchestrator
            .database()
            .import_book("book", Some("Title".into()), book)
            .await
            .unwrap();

        let action = ChangeAction::Tombstone {
            table: BOOKS.to_string(),
            key: "book".to_string(),
            record_id: None,
        };
        let report = orchestrator.handle_change(&action).await.unwrap();

        assert_eq!(report.updated, 1);
        let item = orchestrator
            .database()
            .get_library_item("book")
            .await
            .unwrap()
            .unwrap();
        assert!(item.sync.deleted);
        assert!(item.sync.is_synced);
        let again = orchestrator.handle_change(&action).await.unwrap();
        assert_eq!(again.updated, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn realtime_bookmark_change_pulls_that_book() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        let list = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/collections/bookmarks/records")
                    .query_param("filter", "(user='u1' && bookId='book')");
                then.status(200).json_body(json!({
                    "page": 1,
                    "totalPages": 1,
                    "items": [{
                        "id": "b9",
                        "bookId": "book",
                        "locatorJson": "{\"href\":\"c3\"}",
                        "updatedAt": 50,
                    }],
                }));
            })
            .await;
        let orchestrator = orchestrator(&server, dir.path()).await;

        let action = ChangeAction::Pull {
            table: BOOKMARKS.to_string(),
            key: "book".to_string(),
            record_id: Some("b9".to_string()),
        };
        orchestrator.dispatch(&ListenerEvent::Change(action)).await;

        list.assert_async().await;
        let bookmarks = orchestrator.database().list_bookmarks("book").await.unwrap();
        assert_eq!(bookmarks.len(), 1);
        assert_eq!(bookmarks[0].locator.href(), "c3");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn realtime_bookmark_delete_tombstones_by_record_id() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        let list = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/collections/bookmarks/records");
                then.status(200)
                    .json_body(json!({ "page": 1, "totalPages": 1, "items": [] }));
            })
            .await;
        let orchestrator = orchestrator(&server, dir.path()).await;
        let db = orchestrator.database();
        let bookmark = db.add_bookmark("book", locator("c1"), None).await.unwrap();
        {
            let guard = db.lock().await;
            LibSqlBookmarkRepository::new(guard.connection())
                .mark_synced(&bookmark.local_id, "b1", bookmark.sync.updated_at)
                .await
                .unwrap();
        }

        let frame = json!({
            "topic": "realtime:public:bookmarks",
            "event": "postgres_changes",
            "payload": {
                "type": "DELETE",
                "old_record": { "user_id": USER, "book_id": "book", "id": "b1" }
            }
        })
        .to_string();
        let action = crate::realtime::protocol::route(&frame, USER).unwrap();
        let report = orchestrator.handle_change(&action).await.unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(list.hits_async().await, 0);
        assert!(db.list_bookmarks("book").await.unwrap().is_empty());
        let stored = db.get_bookmark(&bookmark.local_id).await.unwrap().unwrap();
        assert!(stored.sync.deleted);
        assert!(stored.sync.is_synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn realtime_global_note_change_pulls_by_id() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        let get = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/collections/ai_notes/records/n1");
                then.status(200).json_body(json!({
                    "id": "n1",
                    "originalText": "What is entropy?",
                    "aiResponse": "A measure of disorder.",
                    "updatedAt": 50,
                }));
            })
            .await;
        let orchestrator = orchestrator(&server, dir.path()).await;

        let action = ChangeAction::Pull {
            table: AI_NOTES.to_string(),
            key: String::new(),
            record_id: Some("n1".to_string()),
        };
        let report = orchestrator.handle_change(&action).await.unwrap();

        get.assert_async().await;
        assert_eq!(report.updated, 1);
        let notes = orchestrator.database().list_notes(None, 10).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].sync.remote_id.as_deref(), Some("n1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn realtime_progress_delete_drops_linked_position() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(&server, dir.path()).await;
        let db = orchestrator.database();
        let position = db.record_position("book", locator("c2")).await.unwrap();
        {
            let guard = db.lock().await;
            LibSqlPositionRepository::new(guard.connection())
                .mark_synced("book", "p1", position.updated_at)
                .await
                .unwrap();
        }

        let other = ChangeAction::Tombstone {
            table: PROGRESS.to_string(),
            key: "book".to_string(),
            record_id: Some("p9".to_string()),
        };
        assert_eq!(orchestrator.handle_change(&other).await.unwrap().updated, 0);
        assert!(db.get_position("book").await.unwrap().is_some());

        let linked = ChangeAction::Tombstone {
            table: PROGRESS.to_string(),
            key: "book".to_string(),
            record_id: Some("p1".to_string()),
        };
        assert_eq!(orchestrator.handle_change(&linked).await.unwrap().updated, 1);
        assert!(db.get_position("book").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn logout_wipes_tokens_store_and_sandbox() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        let library_dir = dir.path().join("library");
        std::fs::create_dir_all(&library_dir).unwrap();
        std::fs::write(library_dir.join("r1-book.epub"), b"epub").unwrap();
        let orchestrator = orchestrator(&server, &library_dir).await;
        orchestrator
            .database()
            .add_bookmark("book", locator("c1"), None)
            .await
            .unwrap();

        orchestrator.logout().await.unwrap();

        assert_eq!(orchestrator.authenticator.store().access_token().unwrap(), None);
        assert_eq!(orchestrator.current_user().await.unwrap(), None);
        assert!(orchestrator
            .database()
            .list_bookmarks("book")
            .await
            .unwrap()
            .is_empty());
        assert!(!library_dir.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn realtime_listener_requires_configured_endpoint() {
        let server = MockServer::start_async().await;
        let dir = tempdir().unwrap();
        let orchestrator = orchestrator(&server, dir.path()).await;

        assert!(orchestrator.realtime_listener().await.unwrap().is_none());
    }
}
