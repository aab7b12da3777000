//! AI notes.

use super::records::{self, RemoteNote, AI_NOTES};
use super::rest::{key_filter, user_filter};
use super::{
    decide, decode, LocalClock, MergeDecision, PullReport, PushOutcome, PushReport, PushRequest,
    SyncGateway,
};
use crate::db::{LibSqlNoteRepository, NoteRepository};
use crate::models::{AiNote, ChatTurn, ConflictWinner, LocalId, Locator, SyncMeta};
use crate::{Error, Result};

impl SyncGateway {
    pub async fn push_note(&self, id: &LocalId) -> Result<PushOutcome> {
        let user_id = self.user_id().await?;
        let note = self
            .db
            .get_note(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Note {id}")))?;
        let record_key = id.to_string();

        let request = PushRequest {
            collection: AI_NOTES,
            record_key: &record_key,
            remote_id: note.sync.remote_id.as_deref(),
            key_filter: None,
            updated_at: note.sync.updated_at,
            deleted: note.sync.deleted,
            payload: records::note_payload(&user_id, &note),
        };
        let (outcome, _) = self.push_record(request).await?;

        let db = self.db.lock().await;
        let repo = LibSqlNoteRepository::new(db.connection());
        repo.mark_synced(id, outcome.remote_id(), note.sync.updated_at)
            .await?;
        if let PushOutcome::RemoteDeleted { deleted_at, .. } = &outcome {
            repo.apply_remote_tombstone(id, *deleted_at).await?;
        }
        Ok(outcome)
    }

    pub async fn push_pending_notes(&self) -> Result<PushReport> {
        let pending = {
            let db = self.db.lock().await;
            LibSqlNoteRepository::new(db.connection())
                .list_unsynced()
                .await?
        };
        let mut report = PushReport::default();
        for note in pending {
            let result = self.push_note(&note.local_id).await;
            report.tally(AI_NOTES, &note.local_id.to_string(), result)?;
        }
        Ok(report)
    }

    pub async fn pull_notes(&self) -> Result<PullReport> {
        let user_id = self.user_id().await?;
        let report = self.pull_notes_matching(&user_filter(&user_id)).await?;
        tracing::info!(
            "Pulled notes: {} updated, {} ignored, {} skipped",
            report.updated,
            report.ignored,
            report.skipped
        );
        Ok(report)
    }

    /// Pull the notes attached to one book.
    pub async fn pull_notes_for_book(&self, book_key: &str) -> Result<PullReport> {
        let user_id = self.user_id().await?;
        self.pull_notes_matching(&key_filter(&user_id, "bookId", book_key))
            .await
    }

    /// Pull one note by backend id, for notes not attached to a book.
    pub async fn pull_note(&self, remote_id: &str) -> Result<PullReport> {
        let mut report = PullReport::default();
        if let Some(record) = self.rest.get(AI_NOTES, remote_id).await? {
            if let Some(note) = decode::<RemoteNote>(AI_NOTES, record, &mut report) {
                self.merge_note(note, &mut report).await?;
            }
        }
        Ok(report)
    }

    /// Tombstone the note linked to `remote_id` after a remote delete.
    pub async fn apply_note_tombstone(&self, remote_id: &str, deleted_at: i64) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlNoteRepository::new(db.connection());
        match repo.find_by_remote_id(remote_id).await? {
            Some(note) if !note.sync.deleted => {
                repo.apply_remote_tombstone(&note.local_id, deleted_at).await?;
                tracing::debug!("Note {} deleted remotely", remote_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pull_notes_matching(&self, filter: &str) -> Result<PullReport> {
        let remote = self.rest.list(AI_NOTES, filter).await?;
        let mut report = PullReport::default();
        for record in remote {
            if let Some(note) = decode::<RemoteNote>(AI_NOTES, record, &mut report) {
                self.merge_note(note, &mut report).await?;
            }
        }
        Ok(report)
    }

    async fn merge_note(&self, remote: RemoteNote, report: &mut PullReport) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlNoteRepository::new(db.connection());
        let local = repo.find_by_remote_id(&remote.id).await?;
        let decision = decide(
            local
                .as_ref()
                .map(|note| LocalClock::new(note.sync.updated_at, note.sync.deleted)),
            remote.updated_at,
            remote.deleted,
        );
        tracing::debug!("Note {}: {:?}", remote.id, decision);

        match decision {
            MergeDecision::Insert | MergeDecision::ApplyRemote => {
                let local_id = local
                    .as_ref()
                    .map_or_else(LocalId::new, |note| note.local_id.clone());
                repo.upsert(&remote_note(&remote, local_id)).await?;
            }
            MergeDecision::ApplyTombstone => {
                if let Some(local) = &local {
                    repo.apply_remote_tombstone(&local.local_id, remote.updated_at)
                        .await?;
                }
            }
            MergeDecision::KeepLocal => {
                drop(db);
                if let Some(local) = &local {
                    self.record_conflict(
                        AI_NOTES,
                        &local.local_id.to_string(),
                        local.sync.updated_at,
                        remote.updated_at,
                        ConflictWinner::Local,
                    )
                    .await;
                }
            }
            MergeDecision::Unchanged => {}
        }
        report.count(decision);
        Ok(())
    }
}

fn remote_note(remote: &RemoteNote, local_id: LocalId) -> AiNote {
    let mut turns = remote.turns();
    if turns.is_empty() {
        if let Some(original) = &remote.original_text {
            turns.push(ChatTurn::user(original.clone()));
        }
        if let Some(response) = &remote.ai_response {
            turns.push(ChatTurn::assistant(response.clone()));
        }
    }
    let locator = Locator::parse_optional(remote.locator_json.clone()).unwrap_or_else(|error| {
        tracing::warn!("Dropping bad locator on note {}: {}", remote.id, error);
        None
    });

    AiNote {
        local_id,
        book_key: remote.book_id.clone(),
        book_title: remote.book_title.clone(),
        turns,
        original_text: remote.original_text.clone(),
        ai_response: remote.ai_response.clone(),
        locator,
        profile_remote_id: remote.profile_id.clone(),
        created_at: if remote.created_at > 0 {
            remote.created_at
        } else {
            remote.updated_at
        },
        sync: SyncMeta::from_remote(&remote.id, remote.updated_at, false),
    }
}
