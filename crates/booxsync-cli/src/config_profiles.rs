//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use booxsync_core::config::{ClientConfig, ClientConfigFile};
use serde::{Deserialize, Serialize};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "cli-config.json";
const APP_DIR_NAME: &str = "booxsync";
pub const PROFILE_ENV: &str = "BOOXSYNC_PROFILE";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub realtime_url: Option<String>,
    #[serde(default)]
    pub realtime_api_key: Option<String>,
    #[serde(default)]
    pub library_dir: Option<PathBuf>,
}

const fn default_config_version() -> u32 {
    1
}

fn app_dir(base: Option<PathBuf>, kind: &str) -> Result<PathBuf, CliError> {
    base.map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| CliError::Config(format!("Failed to resolve the {kind} directory")))
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    Ok(app_dir(dirs::config_dir(), "config")?.join(CONFIG_FILE_NAME))
}

/// Per-profile data directory holding the database and the library sandbox.
pub fn profile_data_dir(profile_name: &str) -> Result<PathBuf, CliError> {
    Ok(app_dir(dirs::data_dir(), "data")?.join(profile_name))
}

pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    booxsync_core::util::normalize_text_option(value)
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, CliError> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| {
            CliError::Config(format!("Failed to read config at {}: {}", path.display(), error))
        })?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            CliError::Config(format!("Failed to parse config at {}: {}", path.display(), error))
        })?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, CliError> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), CliError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        if let Some(profile) = normalize_profile_name(explicit) {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(std::env::var(PROFILE_ENV).ok().as_deref())
        {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(self.active_profile.as_deref()) {
            return profile;
        }
        "default".to_string()
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

impl CliProfile {
    /// Engine configuration for this profile.
    ///
    /// Returns `Ok(None)` when the profile has no backend URL.
    pub fn client_config(&self, default_library_dir: &Path) -> Result<Option<ClientConfig>, CliError> {
        let Some(backend_url) = normalize_text_option(self.backend_url.clone()) else {
            return Ok(None);
        };
        let file = ClientConfigFile {
            backend_url,
            realtime_url: self.realtime_url.clone(),
            realtime_api_key: self.realtime_api_key.clone(),
            library_dir: self.library_dir.clone(),
            ..ClientConfigFile::default()
        };
        Ok(Some(file.into_config(default_library_dir)?))
    }

    fn normalize(&mut self) {
        self.backend_url = normalize_text_option(self.backend_url.clone())
            .map(|url| url.trim_end_matches('/').to_string());
        self.realtime_url = normalize_text_option(self.realtime_url.clone());
        self.realtime_api_key = normalize_text_option(self.realtime_api_key.clone());
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn normalize_profile_name_rejects_empty() {
        assert_eq!(normalize_profile_name(None), None);
        assert_eq!(normalize_profile_name(Some(" ")), None);
        assert_eq!(normalize_profile_name(Some(" work ")), Some("work".to_string()));
    }

    #[test]
    fn config_roundtrip_normalizes_profiles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = CliProfilesConfig {
            version: 1,
            active_profile: Some(" default ".to_string()),
            profiles: BTreeMap::new(),
        };
        config.profiles.insert(
            "default".to_string(),
            CliProfile {
                backend_url: Some(" https://books.example.com/ ".to_string()),
                realtime_url: Some(" ".to_string()),
                realtime_api_key: None,
                library_dir: None,
            },
        );

        config.save_to_path(&path).unwrap();
        let loaded = CliProfilesConfig::load_from_path(&path).unwrap();
        let profile = loaded.profile("default").unwrap();
        assert_eq!(loaded.active_profile.as_deref(), Some("default"));
        assert_eq!(
            profile.backend_url.as_deref(),
            Some("https://books.example.com")
        );
        assert_eq!(profile.realtime_url, None);
    }

    #[test]
    fn missing_config_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let loaded = CliProfilesConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, CliProfilesConfig::default());
    }

    #[test]
    fn resolve_profile_name_prefers_explicit_then_active() {
        let config = CliProfilesConfig {
            version: 1,
            active_profile: Some("work".to_string()),
            profiles: BTreeMap::new(),
        };
        assert_eq!(config.resolve_profile_name(Some("tablet")), "tablet");
        if std::env::var(PROFILE_ENV).is_err() {
            assert_eq!(config.resolve_profile_name(None), "work");
        }
    }

    #[test]
    fn client_config_requires_backend_and_complete_realtime_pair() {
        let library = Path::new("/data/library");
        assert!(CliProfile::default().client_config(library).unwrap().is_none());

        let profile = CliProfile {
            backend_url: Some("https://books.example.com".to_string()),
            realtime_url: Some("https://rt.example.com".to_string()),
            realtime_api_key: Some("anon".to_string()),
            library_dir: None,
        };
        let config = profile.client_config(library).unwrap().unwrap();
        assert_eq!(config.backend_url, "https://books.example.com");
        assert_eq!(config.library_dir, library);
        assert_eq!(config.realtime.unwrap().url, "wss://rt.example.com");

        let incomplete = CliProfile {
            realtime_api_key: None,
            ..profile
        };
        assert!(incomplete.client_config(library).is_err());
    }
}
