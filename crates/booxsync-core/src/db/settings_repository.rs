//! Settings repository implementation

use crate::error::Result;
use crate::models::{ContrastMode, Settings};
use libsql::Connection;

/// Trait for settings storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SettingsRepository {
    /// Load settings from the database
    async fn load(&self) -> Result<Settings>;

    /// Save settings to the database
    async fn save(&self, settings: &Settings) -> Result<()>;

    /// Record a confirmed push. Returns whether settings are now clean.
    async fn mark_synced(&self, remote_id: &str, pushed_at: i64) -> Result<bool>;
}

/// libSQL implementation of `SettingsRepository`
pub struct LibSqlSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

const fn flag_text(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

impl SettingsRepository for LibSqlSettingsRepository<'_> {
    async fn load(&self) -> Result<Settings> {
        let mut settings = Settings::default();

        if let Some(value) = self.get_setting("page_tap_enabled").await? {
            settings.page_tap_enabled = parse_flag(&value);
        }
        if let Some(value) = self.get_setting("page_swipe_enabled").await? {
            settings.page_swipe_enabled = parse_flag(&value);
        }
        if let Some(value) = self.get_setting("text_size").await? {
            if let Ok(size) = value.parse() {
                settings.text_size = size;
            }
        }
        if let Some(value) = self.get_setting("contrast_mode").await? {
            settings.contrast_mode =
                serde_json::from_str(&format!("\"{value}\"")).unwrap_or_default();
        }
        if let Some(value) = self.get_setting("convert_to_traditional_chinese").await? {
            settings.convert_to_traditional_chinese = parse_flag(&value);
        }
        if let Some(value) = self.get_setting("page_animation_enabled").await? {
            settings.page_animation_enabled = parse_flag(&value);
        }
        if let Some(value) = self.get_setting("show_page_indicator").await? {
            settings.show_page_indicator = parse_flag(&value);
        }
        if let Some(value) = self.get_setting("language").await? {
            settings.language = value;
        }
        settings.active_profile_remote_id = self
            .get_setting("active_profile_remote_id")
            .await?
            .filter(|value| !value.is_empty());
        settings.sync.remote_id = self
            .get_setting("sync.remote_id")
            .await?
            .filter(|value| !value.is_empty());
        if let Some(value) = self.get_setting("sync.updated_at").await? {
            settings.sync.updated_at = value.parse().unwrap_or_default();
        }
        if let Some(value) = self.get_setting("sync.is_synced").await? {
            settings.sync.is_synced = parse_flag(&value);
        }

        Ok(settings)
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        let contrast = serde_json::to_string(&settings.contrast_mode)
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();
        let entries = [
            ("page_tap_enabled", flag_text(settings.page_tap_enabled).to_string()),
            ("page_swipe_enabled", flag_text(settings.page_swipe_enabled).to_string()),
            ("text_size", settings.text_size.to_string()),
            ("contrast_mode", contrast),
            (
                "convert_to_traditional_chinese",
                flag_text(settings.convert_to_traditional_chinese).to_string(),
            ),
            (
                "page_animation_enabled",
                flag_text(settings.page_animation_enabled).to_string(),
            ),
            ("show_page_indicator", flag_text(settings.show_page_indicator).to_string()),
            ("language", settings.language.clone()),
            (
                "active_profile_remote_id",
                settings.active_profile_remote_id.clone().unwrap_or_default(),
            ),
            ("sync.remote_id", settings.sync.remote_id.clone().unwrap_or_default()),
            ("sync.updated_at", settings.sync.updated_at.to_string()),
            ("sync.is_synced", flag_text(settings.sync.is_synced).to_string()),
        ];

        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        for (key, value) in &entries {
            if let Err(error) = self.set_setting(key, value).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(error);
            }
        }
        self.conn.execute("COMMIT", ()).await?;
        Ok(())
    }

    async fn mark_synced(&self, remote_id: &str, pushed_at: i64) -> Result<bool> {
        self.set_setting("sync.remote_id", remote_id).await?;
        let current = self.get_setting("sync.updated_at").await?;
        if current.as_deref() == Some(pushed_at.to_string().as_str()) {
            self.set_setting("sync.is_synced", "true").await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

impl LibSqlSettingsRepository<'_> {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_load_default_settings() {
        let db = setup().await;
        let repo = LibSqlSettingsRepository::new(db.connection());

        let settings = repo.load().await.unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_and_load_settings() {
        let db = setup().await;
        let repo = LibSqlSettingsRepository::new(db.connection());

        let mut settings = Settings {
            text_size: 120,
            contrast_mode: ContrastMode::Sepia,
            convert_to_traditional_chinese: true,
            language: "zh-TW".to_string(),
            active_profile_remote_id: Some("p1".to_string()),
            ..Settings::default()
        };
        settings.sync.touch(1_000);

        repo.save(&settings).await.unwrap();

        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded, settings);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mark_synced_requires_matching_clock() {
        let db = setup().await;
        let repo = LibSqlSettingsRepository::new(db.connection());
        let mut settings = Settings::default();
        settings.sync.touch(500);
        repo.save(&settings).await.unwrap();

        assert!(!repo.mark_synced("s1", 400).await.unwrap());
        assert!(repo.mark_synced("s1", 500).await.unwrap());

        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded.sync.remote_id.as_deref(), Some("s1"));
        assert!(loaded.sync.is_synced);
    }
}
