//! Remote record shapes and their JSON payloads.
//!
//! Remote fields are camelCase. Timestamps arrive as numbers, numeric strings
//! or datetime strings depending on how the record was written, so every
//! clock field goes through a lenient deserializer that reads missing values as 0.

use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::models::{
    AiNote, AiProfile, Bookmark, ChatTurn, ContrastMode, LibraryItem, ReadingPosition, Settings,
};
use crate::util::truncate_with_marker;

pub const BOOKS: &str = "books";
pub const PROGRESS: &str = "progress";
pub const BOOKMARKS: &str = "bookmarks";
pub const AI_NOTES: &str = "ai_notes";
pub const AI_PROFILES: &str = "ai_profiles";
pub const SETTINGS: &str = "settings";

/// Longest text a note field may carry to the backend.
pub const NOTE_TEXT_MAX_CHARS: usize = 5000;
/// Longest single turn once a conversation has been compacted.
pub const NOTE_TURN_MAX_CHARS: usize = 1200;
pub const TRUNCATION_MARKER: &str = "\n\n[truncated for sync]";

fn millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_millis).unwrap_or(0))
}

fn optional_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(value_to_millis)
        .filter(|millis| *millis > 0))
}

/// Read a timestamp in milliseconds from a JSON value.
pub fn value_to_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            if let Ok(millis) = text.parse::<i64>() {
                return Some(millis);
            }
            if let Ok(float) = text.parse::<f64>() {
                return Some(float as i64);
            }
            chrono::DateTime::parse_from_rfc3339(&text.replacen(' ', "T", 1))
                .ok()
                .map(|datetime| datetime.timestamp_millis())
        }
        _ => None,
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(flag)) => flag,
        Some(Value::Number(number)) => number.as_i64().is_some_and(|n| n != 0),
        Some(Value::String(text)) => matches!(text.trim(), "true" | "1"),
        _ => false,
    })
}

fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(crate::util::normalize_text_option(value))
}

/// Fields every synchronized collection carries
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMeta {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub deleted: bool,
    #[serde(default, deserialize_with = "millis")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBook {
    pub id: String,
    pub book_id: String,
    #[serde(default, deserialize_with = "text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub storage_path: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub book_file: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub file_hash: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub completed: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub deleted: bool,
    #[serde(default, deserialize_with = "optional_millis")]
    pub deleted_at: Option<i64>,
    #[serde(default, deserialize_with = "millis")]
    pub updated_at: i64,
}

impl RemoteBook {
    /// `{recordId}/{fileName}` of the uploaded file, if any.
    pub fn storage_path(&self) -> Option<String> {
        if let Some(path) = self.storage_path.as_deref() {
            let path = path.trim_matches('/');
            if crate::storage::split_storage_path(path).is_some() {
                return Some(path.to_string());
            }
        }
        self.book_file
            .as_deref()
            .map(|file_name| format!("{}/{file_name}", self.id))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePosition {
    pub id: String,
    pub book_id: String,
    #[serde(default)]
    pub locator_json: String,
    #[serde(default, deserialize_with = "millis")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBookmark {
    pub id: String,
    pub book_id: String,
    pub locator_json: String,
    #[serde(default, deserialize_with = "text")]
    pub highlight: Option<String>,
    #[serde(default, deserialize_with = "millis")]
    pub created_at: i64,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub deleted: bool,
    #[serde(default, deserialize_with = "millis")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNote {
    pub id: String,
    #[serde(default, deserialize_with = "text")]
    pub book_id: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub book_title: Option<String>,
    #[serde(default)]
    pub messages: Value,
    #[serde(default, deserialize_with = "text")]
    pub original_text: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub ai_response: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub locator_json: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub profile_id: Option<String>,
    #[serde(default, deserialize_with = "millis")]
    pub created_at: i64,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub deleted: bool,
    #[serde(default, deserialize_with = "millis")]
    pub updated_at: i64,
}

impl RemoteNote {
    /// Conversation turns, whether sent as a JSON array or a JSON string.
    pub fn turns(&self) -> Vec<ChatTurn> {
        let parsed = match &self.messages {
            Value::String(raw) if !raw.trim().is_empty() => serde_json::from_str(raw),
            Value::Array(_) => serde_json::from_value(self.messages.clone()),
            _ => return Vec::new(),
        };
        parsed.unwrap_or_else(|error| {
            tracing::warn!("Ignoring unreadable messages on note {}: {}", self.id, error);
            Vec::new()
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub server_base_url: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub user_prompt_template: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub use_streaming: bool,
    pub temperature: Option<f64>,
    pub max_tokens: Option<f64>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    #[serde(default)]
    pub assistant_role: String,
    #[serde(default, deserialize_with = "millis")]
    pub created_at: i64,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub deleted: bool,
    #[serde(default, deserialize_with = "millis")]
    pub updated_at: i64,
}

impl RemoteProfile {
    /// Materialize as a profile, keeping the given local identity.
    pub fn to_profile(&self, local_id: crate::models::LocalId) -> AiProfile {
        let defaults = AiProfile::new(&self.name, &self.model_name, &self.server_base_url);
        AiProfile {
            local_id,
            name: self.name.trim().to_string(),
            model_name: self.model_name.clone(),
            api_key: self.api_key.clone(),
            server_base_url: self.server_base_url.clone(),
            system_prompt: self.system_prompt.clone(),
            user_prompt_template: if self.user_prompt_template.is_empty() {
                defaults.user_prompt_template
            } else {
                self.user_prompt_template.clone()
            },
            use_streaming: self.use_streaming,
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self
                .max_tokens
                .map_or(defaults.max_tokens, |tokens| tokens as i64),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            frequency_penalty: self.frequency_penalty.unwrap_or(defaults.frequency_penalty),
            presence_penalty: self.presence_penalty.unwrap_or(defaults.presence_penalty),
            assistant_role: if self.assistant_role.is_empty() {
                defaults.assistant_role
            } else {
                self.assistant_role.clone()
            },
            created_at: if self.created_at > 0 {
                self.created_at
            } else {
                self.updated_at
            },
            sync: crate::models::SyncMeta::from_remote(&self.id, self.updated_at, self.deleted),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSettings {
    pub id: String,
    pub page_tap_enabled: Option<bool>,
    pub page_swipe_enabled: Option<bool>,
    pub contrast_mode: Option<f64>,
    pub convert_to_traditional_chinese: Option<bool>,
    pub page_animation_enabled: Option<bool>,
    pub show_page_indicator: Option<bool>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub active_profile_id: Option<String>,
    #[serde(default, deserialize_with = "millis")]
    pub updated_at: i64,
}

impl RemoteSettings {
    /// Overlay the synchronized fields onto `local`; device-local fields are kept.
    pub fn apply_to(&self, local: &Settings) -> Settings {
        let defaults = Settings::default();
        Settings {
            page_tap_enabled: self.page_tap_enabled.unwrap_or(defaults.page_tap_enabled),
            page_swipe_enabled: self
                .page_swipe_enabled
                .unwrap_or(defaults.page_swipe_enabled),
            text_size: local.text_size,
            contrast_mode: self
                .contrast_mode
                .map_or(defaults.contrast_mode, |index| {
                    ContrastMode::from_index(index as i64)
                }),
            convert_to_traditional_chinese: self
                .convert_to_traditional_chinese
                .unwrap_or(defaults.convert_to_traditional_chinese),
            page_animation_enabled: self
                .page_animation_enabled
                .unwrap_or(defaults.page_animation_enabled),
            show_page_indicator: self
                .show_page_indicator
                .unwrap_or(defaults.show_page_indicator),
            language: self.language.clone().unwrap_or_default(),
            active_profile_remote_id: self.active_profile_id.clone(),
            sync: crate::models::SyncMeta::from_remote(&self.id, self.updated_at, false),
        }
    }
}

// --- Payloads ---

pub fn book_payload(user_id: &str, item: &LibraryItem) -> Value {
    let mut payload = json!({
        "user": user_id,
        "bookId": item.book_key,
        "title": item.title.clone().unwrap_or_default(),
        "fileHash": item.file_hash.as_deref().unwrap_or(&item.book_key),
        "completed": item.completed,
        "deleted": item.sync.deleted,
        "updatedAt": item.sync.updated_at,
    });
    if let Some(path) = item.file.storage_path() {
        payload["storagePath"] = Value::from(path);
    }
    if let Some(deleted_at) = item.deleted_at {
        payload["deletedAt"] = Value::from(deleted_at);
    }
    payload
}

pub fn position_payload(user_id: &str, position: &ReadingPosition, book_title: Option<&str>) -> Value {
    json!({
        "user": user_id,
        "bookId": position.book_key,
        "bookTitle": book_title.unwrap_or_default(),
        "locatorJson": position.locator.as_str(),
        "updatedAt": position.updated_at,
    })
}

pub fn bookmark_payload(user_id: &str, bookmark: &Bookmark) -> Value {
    json!({
        "user": user_id,
        "bookId": bookmark.book_key,
        "locatorJson": bookmark.locator.as_str(),
        "highlight": bookmark.highlight.clone().unwrap_or_default(),
        "createdAt": bookmark.created_at,
        "deleted": bookmark.sync.deleted,
        "updatedAt": bookmark.sync.updated_at,
    })
}

pub fn note_payload(user_id: &str, note: &AiNote) -> Value {
    let original_text = note.original_text().trim().to_string();
    let response = note.response().trim().to_string();
    json!({
        "user": user_id,
        "bookId": note.book_key.clone().unwrap_or_default(),
        "bookTitle": note.book_title.clone().unwrap_or_default(),
        "messages": messages_for_sync(&note.turns, &original_text, &response),
        "originalText": truncate_with_marker(&original_text, NOTE_TEXT_MAX_CHARS, TRUNCATION_MARKER),
        "aiResponse": truncate_with_marker(&response, NOTE_TEXT_MAX_CHARS, TRUNCATION_MARKER),
        "status": note.status(),
        "locatorJson": note.locator.as_ref().map(|locator| locator.as_str()).unwrap_or_default(),
        "profileId": note.profile_remote_id.clone().unwrap_or_default(),
        "createdAt": note.created_at,
        "deleted": note.sync.deleted,
        "updatedAt": note.sync.updated_at,
    })
}

/// Serialized conversation, compacted when it exceeds the field limit.
///
/// An oversized conversation collapses to the passage and the answer, each
/// cut to a single-turn limit.
pub fn messages_for_sync(turns: &[ChatTurn], original_text: &str, response: &str) -> String {
    let raw = serde_json::to_string(turns).unwrap_or_else(|_| "[]".to_string());
    if raw.chars().count() <= NOTE_TEXT_MAX_CHARS {
        return raw;
    }

    let mut compact = Vec::new();
    if !original_text.is_empty() {
        compact.push(ChatTurn::user(truncate_with_marker(
            original_text,
            NOTE_TURN_MAX_CHARS,
            TRUNCATION_MARKER,
        )));
    }
    if !response.is_empty() {
        compact.push(ChatTurn::assistant(truncate_with_marker(
            response,
            NOTE_TURN_MAX_CHARS,
            TRUNCATION_MARKER,
        )));
    }
    if compact.is_empty() {
        compact.push(ChatTurn::assistant("Conversation truncated for sync size limit."));
    }
    serde_json::to_string(&compact).unwrap_or_else(|_| "[]".to_string())
}

pub fn profile_payload(user_id: &str, profile: &AiProfile) -> Value {
    json!({
        "user": user_id,
        "name": profile.name.trim(),
        "modelName": profile.model_name,
        "apiKey": profile.api_key,
        "serverBaseUrl": profile.server_base_url,
        "systemPrompt": profile.system_prompt,
        "userPromptTemplate": profile.user_prompt_template,
        "useStreaming": profile.use_streaming,
        "temperature": profile.temperature,
        "maxTokens": profile.max_tokens,
        "topP": profile.top_p,
        "frequencyPenalty": profile.frequency_penalty,
        "presencePenalty": profile.presence_penalty,
        "assistantRole": profile.assistant_role,
        "createdAt": profile.created_at,
        "deleted": profile.sync.deleted,
        "updatedAt": profile.sync.updated_at,
    })
}

pub fn settings_payload(user_id: &str, settings: &Settings) -> Value {
    json!({
        "user": user_id,
        "pageTapEnabled": settings.page_tap_enabled,
        "pageSwipeEnabled": settings.page_swipe_enabled,
        "contrastMode": settings.contrast_mode.index(),
        "convertToTraditionalChinese": settings.convert_to_traditional_chinese,
        "pageAnimationEnabled": settings.page_animation_enabled,
        "showPageIndicator": settings.show_page_indicator,
        "language": settings.language,
        "activeProfileId": settings.active_profile_remote_id.clone().unwrap_or_default(),
        "updatedAt": settings.sync.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn clocks_parse_from_numbers_and_strings() {
        let meta: RemoteMeta =
            serde_json::from_value(json!({ "id": "r", "updatedAt": "1700000000000" })).unwrap();
        assert_eq!(meta.updated_at, 1_700_000_000_000);

        let meta: RemoteMeta =
            serde_json::from_value(json!({ "id": "r", "updatedAt": 1.5e3 })).unwrap();
        assert_eq!(meta.updated_at, 1500);

        let meta: RemoteMeta =
            serde_json::from_value(json!({ "id": "r", "updatedAt": null })).unwrap();
        assert_eq!(meta.updated_at, 0);

        let meta: RemoteMeta = serde_json::from_value(json!({ "id": "r" })).unwrap();
        assert_eq!(meta.updated_at, 0);
        assert!(!meta.deleted);
    }

    #[test]
    fn backend_datetimes_parse_to_millis() {
        assert_eq!(
            value_to_millis(&json!("2024-01-02 03:04:05.678Z")),
            Some(1_704_164_645_678)
        );
        assert_eq!(value_to_millis(&json!("soon")), None);
    }

    #[test]
    fn storage_path_prefers_explicit_field() {
        let book: RemoteBook = serde_json::from_value(json!({
            "id": "r1",
            "bookId": "k",
            "storagePath": "r1/abc.epub",
            "bookFile": "other.epub",
        }))
        .unwrap();
        assert_eq!(book.storage_path().as_deref(), Some("r1/abc.epub"));

        let book: RemoteBook = serde_json::from_value(json!({
            "id": "r1",
            "bookId": "k",
            "storagePath": "",
            "bookFile": "uploaded.epub",
        }))
        .unwrap();
        assert_eq!(book.storage_path().as_deref(), Some("r1/uploaded.epub"));
    }

    #[test]
    fn remote_note_reads_string_or_array_messages() {
        let as_string: RemoteNote = serde_json::from_value(json!({
            "id": "n1",
            "messages": r#"[{"role":"user","content":"q"}]"#,
        }))
        .unwrap();
        let as_array: RemoteNote = serde_json::from_value(json!({
            "id": "n1",
            "messages": [{ "role": "user", "content": "q" }],
        }))
        .unwrap();
        assert_eq!(as_string.turns(), vec![ChatTurn::user("q")]);
        assert_eq!(as_array.turns(), as_string.turns());
    }

    #[test]
    fn long_conversations_are_compacted() {
        let long = "x".repeat(3000);
        let turns = vec![
            ChatTurn::user(long.clone()),
            ChatTurn::assistant(long.clone()),
            ChatTurn::user("follow up"),
        ];

        let messages = messages_for_sync(&turns, &long, &long);
        let compact: Vec<ChatTurn> = serde_json::from_str(&messages).unwrap();

        assert_eq!(compact.len(), 2);
        assert_eq!(compact[0].content.chars().count(), NOTE_TURN_MAX_CHARS);
        assert!(compact[1].content.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn note_payload_truncates_text_fields() {
        let mut note = AiNote::new(Some("k".into()), "y".repeat(6000));
        note.ai_response = Some(String::new());

        let payload = note_payload("u1", &note);

        let original = payload["originalText"].as_str().unwrap();
        assert_eq!(original.chars().count(), NOTE_TEXT_MAX_CHARS);
        assert!(original.ends_with(TRUNCATION_MARKER));
        assert_eq!(payload["status"], "generating");
    }

    #[test]
    fn settings_payload_leaves_out_text_size() {
        let payload = settings_payload("u1", &Settings::default());
        assert!(payload.get("textSize").is_none());
        assert_eq!(payload["showPageIndicator"], true);
    }

    #[test]
    fn remote_settings_keep_local_text_size() {
        let remote: RemoteSettings = serde_json::from_value(json!({
            "id": "s1",
            "contrastMode": 2,
            "updatedAt": 50,
        }))
        .unwrap();
        let mut local = Settings::default();
        local.text_size = 180;

        let merged = remote.apply_to(&local);
        assert_eq!(merged.text_size, 180);
        assert_eq!(merged.contrast_mode, ContrastMode::Sepia);
        assert!(merged.sync.is_synced);
    }
}
