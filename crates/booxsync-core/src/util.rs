//! Shared utility functions used across multiple modules.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Truncate `value` to `max_chars` characters, appending `marker` when cut.
pub fn truncate_with_marker(value: &str, max_chars: usize, marker: &str) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let keep = max_chars.saturating_sub(marker.chars().count());
    let mut truncated: String = value.chars().take(keep).collect();
    truncated.push_str(marker);
    truncated
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_component(value: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let pattern = UNSAFE.get_or_init(|| {
        Regex::new(r"[^A-Za-z0-9._-]").unwrap_or_else(|error| panic!("invalid regex: {error}"))
    });
    let sanitized = pattern.replace_all(value.trim(), "_").into_owned();
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

/// Lowercase hex SHA-256 of the given bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Normalize a backend base URL: trimmed, no trailing slash, http(s) only.
pub fn normalize_base_url(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() || !is_http_url(trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
}

/// Condense an error response body into a single line.
pub fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorResponse>(body) {
        if let Some(message) = payload
            .message
            .or(payload.msg)
            .or(payload.error_description)
            .or(payload.error)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" https://example.com ".to_string())),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn truncate_with_marker_keeps_short_text() {
        assert_eq!(truncate_with_marker("short", 10, "..."), "short");
    }

    #[test]
    fn truncate_with_marker_respects_limit() {
        let truncated = truncate_with_marker("abcdefghij", 8, "..");
        assert_eq!(truncated, "abcdef..");
        assert_eq!(truncated.chars().count(), 8);
    }

    #[test]
    fn sanitize_file_component_replaces_unsafe_characters() {
        assert_eq!(sanitize_file_component("a b/c:d.epub"), "a_b_c_d.epub");
        assert_eq!(sanitize_file_component("  "), "_");
    }

    #[test]
    fn sha256_hex_matches_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn normalize_base_url_requires_scheme() {
        assert_eq!(
            normalize_base_url(" https://pb.example.com/ "),
            Some("https://pb.example.com".to_string())
        );
        assert_eq!(normalize_base_url("pb.example.com"), None);
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        let message = parse_api_error(StatusCode::BAD_REQUEST, r#"{"message":"nope"}"#);
        assert_eq!(message, "nope (400)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }
}
