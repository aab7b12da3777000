//! AI annotation notes

use serde::{Deserialize, Serialize};

use super::{LocalId, Locator, SyncMeta};

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of an AI conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Generation state reported to other devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    Generating,
    Done,
}

/// An AI conversation attached to a book or kept globally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiNote {
    /// Store-local identity
    pub local_id: LocalId,
    /// Library item stable key, `None` for global notes
    pub book_key: Option<String>,
    /// Title of the book at the time the note was taken
    pub book_title: Option<String>,
    /// Conversation turns, oldest first
    pub turns: Vec<ChatTurn>,
    /// Selected passage, when stored explicitly
    pub original_text: Option<String>,
    /// Model answer, when stored explicitly
    pub ai_response: Option<String>,
    /// Where in the book the passage was selected
    pub locator: Option<Locator>,
    /// Remote id of the profile that produced the answer
    pub profile_remote_id: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Sync bookkeeping
    pub sync: SyncMeta,
}

impl AiNote {
    /// Start a note from a selected passage
    #[must_use]
    pub fn new(book_key: Option<String>, original_text: impl Into<String>) -> Self {
        let now = crate::util::now_millis();
        let original_text = original_text.into();
        Self {
            local_id: LocalId::new(),
            book_key,
            book_title: None,
            turns: vec![ChatTurn::user(original_text.clone())],
            original_text: Some(original_text),
            ai_response: None,
            locator: None,
            profile_remote_id: None,
            created_at: now,
            sync: SyncMeta::new_local(now),
        }
    }

    /// Selected passage, falling back to the last user turn.
    pub fn original_text(&self) -> &str {
        non_blank(self.original_text.as_deref())
            .or_else(|| self.last_turn(ChatRole::User))
            .unwrap_or_default()
    }

    /// Model answer, falling back to the last assistant turn.
    pub fn response(&self) -> &str {
        non_blank(self.ai_response.as_deref())
            .or_else(|| self.last_turn(ChatRole::Assistant))
            .unwrap_or_default()
    }

    pub fn status(&self) -> NoteStatus {
        if self.response().trim().is_empty() {
            NoteStatus::Generating
        } else {
            NoteStatus::Done
        }
    }

    fn last_turn(&self, role: ChatRole) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|turn| turn.role == role && !turn.content.trim().is_empty())
            .map(|turn| turn.content.as_str())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projections_fall_back_to_turns() {
        let mut note = AiNote::new(Some("book".into()), "");
        note.original_text = None;
        note.turns = vec![
            ChatTurn::user("first question"),
            ChatTurn::assistant("first answer"),
            ChatTurn::user("follow up"),
            ChatTurn::assistant("second answer"),
        ];
        assert_eq!(note.original_text(), "follow up");
        assert_eq!(note.response(), "second answer");
        assert_eq!(note.status(), NoteStatus::Done);
    }

    #[test]
    fn explicit_fields_win_over_turns() {
        let mut note = AiNote::new(None, "selected passage");
        note.turns.push(ChatTurn::assistant("from turns"));
        note.ai_response = Some("explicit".into());
        assert_eq!(note.original_text(), "selected passage");
        assert_eq!(note.response(), "explicit");
    }

    #[test]
    fn blank_response_is_generating() {
        let note = AiNote::new(None, "passage");
        assert_eq!(note.status(), NoteStatus::Generating);
    }
}
