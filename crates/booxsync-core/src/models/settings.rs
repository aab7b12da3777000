//! Reader settings model

use serde::{Deserialize, Serialize};

use super::SyncMeta;

/// Page contrast presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContrastMode {
    #[default]
    Normal,
    Dark,
    Sepia,
    HighContrast,
}

impl ContrastMode {
    /// Position in the preset list, as exchanged with the backend.
    pub const fn index(self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Dark => 1,
            Self::Sepia => 2,
            Self::HighContrast => 3,
        }
    }

    pub const fn from_index(index: i64) -> Self {
        match index {
            1 => Self::Dark,
            2 => Self::Sepia,
            3 => Self::HighContrast,
            _ => Self::Normal,
        }
    }
}

/// Reader settings (single row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Settings {
    pub page_tap_enabled: bool,
    pub page_swipe_enabled: bool,
    /// Text size in percent. Device-local, never synchronized.
    pub text_size: u32,
    pub contrast_mode: ContrastMode,
    pub convert_to_traditional_chinese: bool,
    pub page_animation_enabled: bool,
    pub show_page_indicator: bool,
    /// UI language tag, empty for system default
    pub language: String,
    /// Remote id of the AI profile in use
    pub active_profile_remote_id: Option<String>,
    /// Sync bookkeeping (never tombstoned)
    pub sync: SyncMeta,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            page_tap_enabled: true,
            page_swipe_enabled: true,
            text_size: 140,
            contrast_mode: ContrastMode::Normal,
            convert_to_traditional_chinese: false,
            page_animation_enabled: false,
            show_page_indicator: true,
            language: String::new(),
            active_profile_remote_id: None,
            sync: SyncMeta::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.text_size, 140);
        assert_eq!(settings.contrast_mode, ContrastMode::Normal);
        assert_eq!(settings.sync.updated_at, 0);
    }

    #[test]
    fn contrast_mode_index_roundtrip() {
        for mode in [
            ContrastMode::Normal,
            ContrastMode::Dark,
            ContrastMode::Sepia,
            ContrastMode::HighContrast,
        ] {
            assert_eq!(ContrastMode::from_index(mode.index()), mode);
        }
        assert_eq!(ContrastMode::from_index(42), ContrastMode::Normal);
    }
}
