//! Client endpoint configuration.
//!
//! A `ClientConfig` is assembled either from environment variables or from a
//! JSON document, and carries the timing constants of the sync engine.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{normalize_base_url, normalize_text_option};
use crate::{Error, Result};

pub const ENV_BACKEND_URL: &str = "BOOXSYNC_BACKEND_URL";
pub const ENV_REALTIME_URL: &str = "BOOXSYNC_REALTIME_URL";
pub const ENV_REALTIME_KEY: &str = "BOOXSYNC_REALTIME_KEY";
pub const ENV_LIBRARY_DIR: &str = "BOOXSYNC_LIBRARY_DIR";

const DEFAULT_HEARTBEAT_SECS: u64 = 25;
const DEFAULT_RECONNECT_SECS: u64 = 3;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PAGE_SIZE: u32 = 100;

/// Realtime channel endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Socket base URL (`ws://`, `wss://`, or http(s) which is rewritten)
    pub url: String,
    /// Public API key passed as the `apikey` query parameter
    pub api_key: String,
}

/// Runtime configuration of the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// REST backend base URL, without trailing slash
    pub backend_url: String,
    /// Realtime listener endpoint, if the deployment has one
    pub realtime: Option<RealtimeConfig>,
    /// Sandbox directory for downloaded library files
    pub library_dir: PathBuf,
    /// Timeout of a single library file download
    pub download_timeout: Duration,
    /// Realtime heartbeat period
    pub heartbeat_interval: Duration,
    /// Delay before a realtime reconnect
    pub reconnect_backoff: Duration,
    /// Records requested per list page
    pub page_size: u32,
}

impl ClientConfig {
    /// Config with default timings for the given backend.
    pub fn new(backend_url: &str, library_dir: impl Into<PathBuf>) -> Result<Self> {
        let backend_url = normalize_base_url(backend_url).ok_or_else(|| {
            Error::InvalidInput("backend URL must start with http:// or https://".to_string())
        })?;
        Ok(Self {
            backend_url,
            realtime: None,
            library_dir: library_dir.into(),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            reconnect_backoff: Duration::from_secs(DEFAULT_RECONNECT_SECS),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    #[must_use]
    pub fn with_realtime(mut self, realtime: RealtimeConfig) -> Self {
        self.realtime = Some(realtime);
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no backend URL is set.
    pub fn from_env(default_library_dir: &Path) -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok(), default_library_dir)
    }

    /// Parse a JSON configuration document.
    pub fn from_json(payload: &str, default_library_dir: &Path) -> Result<Self> {
        let file: ClientConfigFile = serde_json::from_str(payload)?;
        file.into_config(default_library_dir)
    }
}

/// On-disk form of [`ClientConfig`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfigFile {
    pub backend_url: String,
    #[serde(default)]
    pub realtime_url: Option<String>,
    #[serde(default)]
    pub realtime_api_key: Option<String>,
    #[serde(default)]
    pub library_dir: Option<PathBuf>,
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,
    #[serde(default)]
    pub heartbeat_secs: Option<u64>,
    #[serde(default)]
    pub reconnect_secs: Option<u64>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

impl ClientConfigFile {
    pub fn into_config(self, default_library_dir: &Path) -> Result<ClientConfig> {
        let library_dir = self
            .library_dir
            .unwrap_or_else(|| default_library_dir.to_path_buf());
        let mut config = ClientConfig::new(&self.backend_url, library_dir)?;
        config.realtime = resolve_realtime(self.realtime_url, self.realtime_api_key)?;
        if let Some(secs) = self.download_timeout_secs {
            config.download_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.heartbeat_secs {
            config.heartbeat_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = self.reconnect_secs {
            config.reconnect_backoff = Duration::from_secs(secs);
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size.clamp(1, 500);
        }
        Ok(config)
    }
}

fn parse_config<F>(lookup: F, default_library_dir: &Path) -> Result<Option<ClientConfig>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(backend_url) = normalize_text_option(lookup(ENV_BACKEND_URL)) else {
        return Ok(None);
    };
    let library_dir = normalize_text_option(lookup(ENV_LIBRARY_DIR))
        .map_or_else(|| default_library_dir.to_path_buf(), PathBuf::from);

    let mut config = ClientConfig::new(&backend_url, library_dir).map_err(|_| {
        Error::InvalidInput(format!("{ENV_BACKEND_URL} must start with http:// or https://"))
    })?;
    config.realtime = resolve_realtime(lookup(ENV_REALTIME_URL), lookup(ENV_REALTIME_KEY))?;
    Ok(Some(config))
}

fn resolve_realtime(url: Option<String>, api_key: Option<String>) -> Result<Option<RealtimeConfig>> {
    match (normalize_text_option(url), normalize_text_option(api_key)) {
        (None, None) => Ok(None),
        (Some(url), Some(api_key)) => {
            let url = normalize_socket_url(&url).ok_or_else(|| {
                Error::InvalidInput(format!(
                    "{ENV_REALTIME_URL} must use ws://, wss://, http:// or https://"
                ))
            })?;
            Ok(Some(RealtimeConfig { url, api_key }))
        }
        (Some(_), None) => Err(Error::InvalidInput(format!(
            "{ENV_REALTIME_KEY} is required when {ENV_REALTIME_URL} is set"
        ))),
        (None, Some(_)) => Err(Error::InvalidInput(format!(
            "{ENV_REALTIME_URL} is required when {ENV_REALTIME_KEY} is set"
        ))),
    }
}

/// Rewrite http(s) to ws(s) and drop the trailing slash.
fn normalize_socket_url(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        Some(format!("wss://{rest}"))
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        Some(format!("ws://{rest}"))
    } else if trimmed.starts_with("wss://") || trimmed.starts_with("ws://") {
        Some(trimmed.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse_from_map(map: &HashMap<&str, &str>) -> Result<Option<ClientConfig>> {
        parse_config(
            |key| map.get(key).map(|value| (*value).to_string()),
            Path::new("/data/library"),
        )
    }

    #[test]
    fn parse_config_none_returns_none() {
        let map = HashMap::new();
        assert!(parse_from_map(&map).unwrap().is_none());
    }

    #[test]
    fn parse_config_applies_defaults() {
        let mut map = HashMap::new();
        map.insert(ENV_BACKEND_URL, "https://pb.example.com/");

        let config = parse_from_map(&map).unwrap().unwrap();
        assert_eq!(config.backend_url, "https://pb.example.com");
        assert_eq!(config.library_dir, PathBuf::from("/data/library"));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(config.reconnect_backoff, Duration::from_secs(3));
        assert!(config.realtime.is_none());
    }

    #[test]
    fn parse_config_rewrites_realtime_scheme() {
        let mut map = HashMap::new();
        map.insert(ENV_BACKEND_URL, "https://pb.example.com");
        map.insert(ENV_REALTIME_URL, "https://project.supabase.co/realtime/v1/");
        map.insert(ENV_REALTIME_KEY, "anon");

        let config = parse_from_map(&map).unwrap().unwrap();
        assert_eq!(
            config.realtime,
            Some(RealtimeConfig {
                url: "wss://project.supabase.co/realtime/v1".to_string(),
                api_key: "anon".to_string(),
            })
        );
    }

    #[test]
    fn parse_config_rejects_partial_realtime() {
        let mut map = HashMap::new();
        map.insert(ENV_BACKEND_URL, "https://pb.example.com");
        map.insert(ENV_REALTIME_URL, "wss://rt.example.com");

        let err = parse_from_map(&map).unwrap_err();
        match err {
            Error::InvalidInput(message) => assert!(message.contains(ENV_REALTIME_KEY)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_config_rejects_non_http_backend() {
        let mut map = HashMap::new();
        map.insert(ENV_BACKEND_URL, "pb.example.com");
        assert!(parse_from_map(&map).is_err());
    }

    #[test]
    fn from_json_rejects_unknown_fields() {
        let payload = r#"{"backend_url":"https://pb.example.com","mystery":true}"#;
        assert!(ClientConfig::from_json(payload, Path::new("/tmp")).is_err());
    }

    #[test]
    fn from_json_overrides_timings() {
        let payload = r#"{
            "backend_url": "http://localhost:8090",
            "heartbeat_secs": 10,
            "reconnect_secs": 1,
            "page_size": 1000
        }"#;
        let config = ClientConfig::from_json(payload, Path::new("/tmp/lib")).unwrap();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.reconnect_backoff, Duration::from_secs(1));
        assert_eq!(config.page_size, 500);
        assert_eq!(config.library_dir, PathBuf::from("/tmp/lib"));
    }
}
