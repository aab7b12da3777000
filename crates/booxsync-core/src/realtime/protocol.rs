//! Channel frames and change routing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::RealtimeConfig;

pub const JOIN_EVENT: &str = "phx_join";
pub const HEARTBEAT_EVENT: &str = "heartbeat";
pub const CHANGES_EVENT: &str = "postgres_changes";
pub const PROTOCOL_VERSION: &str = "1.0.0";
const TOPIC_PREFIX: &str = "realtime:public:";

const KEY_FIELDS: [&str; 3] = ["book_id_local", "book_id", "bookId"];
const ID_FIELDS: [&str; 1] = ["id"];
const USER_FIELDS: [&str; 2] = ["user_id", "user"];
const DELETED_FIELDS: [&str; 2] = ["is_deleted", "deleted"];

/// One message on the channel socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    /// Subscribe to every change of `table` owned by `user_id`.
    pub fn join(table: &str, user_id: &str, reference: String) -> Self {
        Self {
            topic: format!("{TOPIC_PREFIX}{table}"),
            event: JOIN_EVENT.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": "public",
                        "table": table,
                        "filter": format!("user_id=eq.{user_id}"),
                    }]
                }
            }),
            reference: Some(reference),
        }
    }

    pub fn heartbeat(reference: String) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: HEARTBEAT_EVENT.to_string(),
            payload: json!({}),
            reference: Some(reference),
        }
    }

    /// Table named by a `realtime:public:<table>` topic.
    pub fn table(&self) -> Option<&str> {
        self.topic
            .strip_prefix(TOPIC_PREFIX)
            .filter(|table| !table.is_empty())
    }
}

/// Socket URL carrying the project key and, when signed in, the access token.
pub fn socket_url(config: &RealtimeConfig, access_token: Option<&str>) -> String {
    let mut url = format!(
        "{}/websocket?apikey={}",
        config.url.trim_end_matches('/'),
        urlencoding::encode(&config.api_key)
    );
    if let Some(token) = access_token.filter(|token| !token.trim().is_empty()) {
        url.push_str("&token=");
        url.push_str(&urlencoding::encode(token));
    }
    url.push_str("&vsn=");
    url.push_str(PROTOCOL_VERSION);
    url
}

/// What the engine should do about one remote change
///
/// `key` is the book the record belongs to, empty for records that are not
/// attached to a book. `record_id` is the backend id of the changed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeAction {
    /// The record was deleted remotely: tombstone it locally
    Tombstone {
        table: String,
        key: String,
        record_id: Option<String>,
    },
    /// The record was written remotely: pull it
    Pull {
        table: String,
        key: String,
        record_id: Option<String>,
    },
}

impl ChangeAction {
    pub fn table(&self) -> &str {
        match self {
            Self::Tombstone { table, .. } | Self::Pull { table, .. } => table,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Tombstone { key, .. } | Self::Pull { key, .. } => key,
        }
    }

    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::Tombstone { record_id, .. } | Self::Pull { record_id, .. } => {
                record_id.as_deref()
            }
        }
    }

    /// Book key, or the record id for records without a book.
    pub fn label(&self) -> &str {
        let key = self.key();
        if key.is_empty() {
            self.record_id().unwrap_or_default()
        } else {
            key
        }
    }
}

/// Decode an inbound message and route it to an action.
///
/// Returns `None` for anything that is not a change to a record owned by
/// `user_id`: other events, malformed text, changes carrying neither a book
/// key nor a record id.
pub fn route(text: &str, user_id: &str) -> Option<ChangeAction> {
    let frame: Frame = serde_json::from_str(text).ok()?;
    if frame.event != CHANGES_EVENT {
        return None;
    }
    let payload = frame.payload.as_object()?;
    let change_type = string_field(Some(payload), &["type", "eventType"])?.to_ascii_uppercase();
    let record = object_field(payload, &["record", "new"]);
    let old_record = object_field(payload, &["old_record", "old"]);

    let owner =
        string_field(record, &USER_FIELDS).or_else(|| string_field(old_record, &USER_FIELDS));
    if owner.is_some_and(|owner| !user_id.is_empty() && owner != user_id) {
        tracing::debug!("Dropping change for another account");
        return None;
    }

    let key = string_field(record, &KEY_FIELDS).or_else(|| string_field(old_record, &KEY_FIELDS));
    let record_id =
        string_field(record, &ID_FIELDS).or_else(|| string_field(old_record, &ID_FIELDS));
    if key.is_none() && record_id.is_none() {
        return None;
    }
    let table = payload
        .get("table")
        .and_then(Value::as_str)
        .or_else(|| frame.table())?
        .to_string();
    let key = key.unwrap_or_default().to_string();
    let record_id = record_id.map(ToString::to_string);

    let deleted = record.is_some_and(|record| {
        DELETED_FIELDS
            .iter()
            .any(|field| flag(record.get(*field)))
    });
    match change_type.as_str() {
        "DELETE" => Some(ChangeAction::Tombstone {
            table,
            key,
            record_id,
        }),
        "UPDATE" if deleted => Some(ChangeAction::Tombstone {
            table,
            key,
            record_id,
        }),
        "INSERT" | "UPDATE" => Some(ChangeAction::Pull {
            table,
            key,
            record_id,
        }),
        _ => None,
    }
}

fn object_field<'a>(
    object: &'a Map<String, Value>,
    names: &[&str],
) -> Option<&'a Map<String, Value>> {
    names
        .iter()
        .find_map(|name| object.get(*name).and_then(Value::as_object))
}

/// First non-blank string among `names`.
fn string_field<'a>(object: Option<&'a Map<String, Value>>, names: &[&str]) -> Option<&'a str> {
    let object = object?;
    names.iter().find_map(|name| {
        object
            .get(*name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    })
}

fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_i64().is_some_and(|n| n != 0),
        Some(Value::String(text)) => text == "true",
        _ => false,
    }
}
