//! AI provider configuration profiles

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{LocalId, SyncMeta};

const API_KEY_PLACEHOLDER_PREFIX: &str = "<YOUR_";

/// Named provider configuration: endpoint, credentials, generation parameters
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AiProfile {
    /// Store-local identity
    pub local_id: LocalId,
    pub name: String,
    pub model_name: String,
    pub api_key: String,
    pub server_base_url: String,
    pub system_prompt: String,
    pub user_prompt_template: String,
    pub use_streaming: bool,
    pub temperature: f64,
    pub max_tokens: i64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub assistant_role: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Sync bookkeeping
    pub sync: SyncMeta,
}

impl AiProfile {
    /// Create a profile with default generation parameters
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        model_name: impl Into<String>,
        server_base_url: impl Into<String>,
    ) -> Self {
        let now = crate::util::now_millis();
        Self {
            local_id: LocalId::new(),
            name: name.into(),
            model_name: model_name.into(),
            api_key: String::new(),
            server_base_url: server_base_url.into(),
            system_prompt: String::new(),
            user_prompt_template: "%s".to_string(),
            use_streaming: true,
            temperature: 0.7,
            max_tokens: 4096,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            assistant_role: "assistant".to_string(),
            created_at: now,
            sync: SyncMeta::new_local(now),
        }
    }

    /// Case-insensitive identity used to match profiles across devices.
    pub fn name_key(&self) -> String {
        self.name.trim().to_lowercase()
    }

    /// Whether the API key looks like a real credential.
    pub fn has_usable_api_key(&self) -> bool {
        let key = self.api_key.trim();
        !key.is_empty() && !key.starts_with(API_KEY_PLACEHOLDER_PREFIX)
    }
}

impl fmt::Debug for AiProfile {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AiProfile")
            .field("local_id", &self.local_id)
            .field("name", &self.name)
            .field("model_name", &self.model_name)
            .field("api_key", &"[REDACTED]")
            .field("server_base_url", &self.server_base_url)
            .field("use_streaming", &self.use_streaming)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_api_key_is_not_usable() {
        let mut profile = AiProfile::new("DeepSeek", "deepseek-chat", "https://api.deepseek.com");
        assert!(!profile.has_usable_api_key());
        profile.api_key = "<YOUR_API_KEY>".into();
        assert!(!profile.has_usable_api_key());
        profile.api_key = "sk-live".into();
        assert!(profile.has_usable_api_key());
    }

    #[test]
    fn name_key_ignores_case_and_padding() {
        let profile = AiProfile::new("  DeepSeek Chat ", "m", "https://x");
        assert_eq!(profile.name_key(), "deepseek chat");
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut profile = AiProfile::new("p", "m", "https://x");
        profile.api_key = "sk-secret".into();
        let rendered = format!("{profile:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
