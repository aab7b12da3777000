//! Streaming client for AI text generation.
//!
//! The response body is read incrementally. Every time new text arrives the
//! caller's callback receives the cumulative text so far, so a renderer can
//! redraw the whole answer on each update.

use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header;
use serde_json::{json, Value};

use crate::auth::{AuthPolicy, Authenticator};
use crate::models::{AiProfile, ChatRole, ChatTurn};

const EVENT_STREAM: &str = "text/event-stream";
const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";
const PROMPT_PLACEHOLDER: &str = "%s";

/// How the response body carries text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDecoding {
    /// The body bytes are the answer
    Raw,
    /// Server-sent events with one JSON delta per `data:` line
    EventStream,
}

/// One streaming generation call
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub url: String,
    /// Provider key sent as a bearer token, never the session token
    pub api_key: Option<String>,
    pub body: Value,
    pub decoding: StreamDecoding,
}

impl ChatRequest {
    /// OpenAI-style chat completion request for a provider profile.
    ///
    /// The last user turn is run through the profile's prompt template and
    /// the system prompt is prepended when set.
    pub fn from_profile(profile: &AiProfile, turns: &[ChatTurn]) -> Self {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        if !profile.system_prompt.trim().is_empty() {
            messages.push(json!({ "role": "system", "content": profile.system_prompt }));
        }

        let last_user = turns.iter().rposition(|turn| turn.role == ChatRole::User);
        for (index, turn) in turns.iter().enumerate() {
            let (role, content) = match turn.role {
                ChatRole::System => ("system", turn.content.clone()),
                ChatRole::User if Some(index) == last_user => {
                    ("user", apply_template(&profile.user_prompt_template, &turn.content))
                }
                ChatRole::User => ("user", turn.content.clone()),
                ChatRole::Assistant => (assistant_role(profile), turn.content.clone()),
            };
            messages.push(json!({ "role": role, "content": content }));
        }

        let mut body = json!({
            "model": profile.model_name,
            "messages": messages,
            "stream": true,
            "temperature": profile.temperature,
            "max_tokens": profile.max_tokens,
            "top_p": profile.top_p,
        });
        if profile.frequency_penalty != 0.0 {
            body["frequency_penalty"] = json!(profile.frequency_penalty);
        }
        if profile.presence_penalty != 0.0 {
            body["presence_penalty"] = json!(profile.presence_penalty);
        }

        let api_key = profile.api_key.trim();
        Self {
            url: profile.server_base_url.trim().to_string(),
            api_key: profile.has_usable_api_key().then(|| api_key.to_string()),
            body,
            decoding: StreamDecoding::EventStream,
        }
    }

    #[must_use]
    pub const fn with_decoding(mut self, decoding: StreamDecoding) -> Self {
        self.decoding = decoding;
        self
    }
}

fn assistant_role(profile: &AiProfile) -> &str {
    let role = profile.assistant_role.trim();
    if role.is_empty() {
        "assistant"
    } else {
        role
    }
}

fn apply_template(template: &str, text: &str) -> String {
    if template.contains(PROMPT_PLACEHOLDER) {
        template.replacen(PROMPT_PLACEHOLDER, text, 1)
    } else if template.trim().is_empty() {
        text.to_string()
    } else {
        format!("{template}\n\n{text}")
    }
}

/// Issues streaming generation requests
#[derive(Clone)]
pub struct StreamingClient {
    authenticator: Arc<Authenticator>,
}

impl StreamingClient {
    pub const fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }

    /// Run `request`, calling `on_text` with the cumulative text after each
    /// chunk that adds some.
    ///
    /// Returns `None` on a non-success status, on a failure before any text
    /// arrived, or when the stream produced no text at all. A failure after
    /// text arrived returns what was accumulated.
    pub async fn stream<F>(&self, request: &ChatRequest, mut on_text: F) -> Option<String>
    where
        F: FnMut(&str),
    {
        let response = match self
            .authenticator
            .send(AuthPolicy::SkipAuth, |client| {
                let mut builder = client
                    .post(&request.url)
                    .header(header::ACCEPT, accept_header(request.decoding))
                    .json(&request.body);
                if let Some(key) = &request.api_key {
                    builder = builder.bearer_auth(key);
                }
                builder
            })
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!("Streaming request to {} failed: {error}", request.url);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Streaming request rejected ({status}): {body}");
            return None;
        }

        let mut decoder = StreamDecoder::new(request.decoding);
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    if decoder.feed(&bytes, &mut on_text) {
                        break;
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        "Stream interrupted after {} chars: {error}",
                        decoder.text.len()
                    );
                    return decoder.into_text();
                }
            }
        }
        decoder.finish(&mut on_text);
        decoder.into_text()
    }
}

const fn accept_header(decoding: StreamDecoding) -> &'static str {
    match decoding {
        StreamDecoding::Raw => "text/plain, */*",
        StreamDecoding::EventStream => EVENT_STREAM,
    }
}

/// Incremental body decoder shared by both decodings.
struct StreamDecoder {
    decoding: StreamDecoding,
    /// Bytes of a UTF-8 sequence split across chunks
    pending: Vec<u8>,
    /// Partial event-stream line
    line: String,
    text: String,
    done: bool,
}

impl StreamDecoder {
    const fn new(decoding: StreamDecoding) -> Self {
        Self {
            decoding,
            pending: Vec::new(),
            line: String::new(),
            text: String::new(),
            done: false,
        }
    }

    /// Consume one chunk. Returns true once the stream signalled completion.
    fn feed<F: FnMut(&str)>(&mut self, bytes: &[u8], on_text: &mut F) -> bool {
        self.pending.extend_from_slice(bytes);
        let decoded = take_utf8(&mut self.pending);
        if !decoded.is_empty() {
            self.push_str(&decoded, on_text);
        }
        self.done
    }

    fn finish<F: FnMut(&str)>(&mut self, on_text: &mut F) {
        if !self.pending.is_empty() {
            let rest = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            self.push_str(&rest, on_text);
        }
        if self.decoding == StreamDecoding::EventStream && !self.done && !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            self.handle_line(&line, on_text);
        }
    }

    fn push_str<F: FnMut(&str)>(&mut self, decoded: &str, on_text: &mut F) {
        match self.decoding {
            StreamDecoding::Raw => {
                self.text.push_str(decoded);
                on_text(&self.text);
            }
            StreamDecoding::EventStream => {
                self.line.push_str(decoded);
                while !self.done {
                    let Some(end) = self.line.find('\n') else {
                        break;
                    };
                    let line: String = self.line.drain(..=end).collect();
                    self.handle_line(&line, on_text);
                }
            }
        }
    }

    fn handle_line<F: FnMut(&str)>(&mut self, line: &str, on_text: &mut F) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(':') {
            return;
        }
        let Some(payload) = trimmed.strip_prefix(DATA_PREFIX) else {
            return;
        };
        let payload = payload.trim();
        if payload == DONE_MARKER {
            self.done = true;
            return;
        }
        let delta = event_delta(payload);
        if !delta.is_empty() {
            self.text.push_str(&delta);
            on_text(&self.text);
        }
    }

    fn into_text(self) -> Option<String> {
        (!self.text.is_empty()).then_some(self.text)
    }
}

/// Split off the longest valid UTF-8 prefix of `buffer`, leaving an
/// incomplete trailing sequence in place. Invalid bytes decode lossily.
fn take_utf8(buffer: &mut Vec<u8>) -> String {
    match std::str::from_utf8(buffer) {
        Ok(text) => {
            let text = text.to_string();
            buffer.clear();
            text
        }
        Err(error) if error.error_len().is_none() => {
            let valid = error.valid_up_to();
            let rest = buffer.split_off(valid);
            let text = String::from_utf8_lossy(buffer).into_owned();
            *buffer = rest;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(buffer).into_owned();
            buffer.clear();
            text
        }
    }
}

/// Text carried by one event payload. Non-JSON payloads are taken verbatim.
fn event_delta(payload: &str) -> String {
    let Ok(event) = serde_json::from_str::<Value>(payload) else {
        return payload.to_string();
    };

    let openai = event
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str);
    let gemini = event
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str);
    let text = [openai, gemini]
        .into_iter()
        .flatten()
        .find(|text| !text.is_empty())
        .or_else(|| {
            ["delta", "content", "text"]
                .into_iter()
                .find_map(|field| event.get(field).and_then(Value::as_str))
        })
        .unwrap_or_default()
        .to_string();
    text
}
