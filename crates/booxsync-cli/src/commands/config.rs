use std::env;
use std::path::PathBuf;

use booxsync_core::util::is_http_url;

use crate::cli::ConfigCommands;
use crate::commands::common::{default_library_dir, resolve_db_path};
use crate::config_profiles::{normalize_text_option, CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            backend_url,
            realtime_url,
            realtime_key,
            library_dir,
            no_activate,
        } => run_config_init(
            global_profile,
            ProfileInput {
                backend_url,
                realtime_url,
                realtime_api_key: realtime_key,
                library_dir,
            },
            no_activate,
        ),
        ConfigCommands::Show => run_config_show(global_profile),
    }
}

/// Values given on the command line for `config init`
pub struct ProfileInput {
    pub backend_url: Option<String>,
    pub realtime_url: Option<String>,
    pub realtime_api_key: Option<String>,
    pub library_dir: Option<PathBuf>,
}

fn env_text(name: &str) -> Option<String> {
    normalize_text_option(env::var(name).ok())
}

pub fn run_config_init(
    profile_name: Option<&str>,
    input: ProfileInput,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile_name);
    let existing = config.profile(&profile_name).cloned().unwrap_or_default();

    let merged = CliProfile {
        backend_url: normalize_text_option(input.backend_url)
            .or_else(|| env_text("BOOXSYNC_BACKEND_URL"))
            .or(existing.backend_url),
        realtime_url: normalize_text_option(input.realtime_url)
            .or_else(|| env_text("BOOXSYNC_REALTIME_URL"))
            .or(existing.realtime_url),
        realtime_api_key: normalize_text_option(input.realtime_api_key)
            .or_else(|| env_text("BOOXSYNC_REALTIME_KEY"))
            .or(existing.realtime_api_key),
        library_dir: input.library_dir.or(existing.library_dir),
    };
    validate_profile(&merged)?;

    *config.profile_mut_or_default(&profile_name) = merged;
    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save()?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    let profile = config
        .profile(&profile_name)
        .ok_or_else(|| CliError::Config("Failed to persist profile".to_string()))?;
    if profile.backend_url.is_none() {
        println!("Profile '{profile_name}' is missing: backend_url");
    } else {
        println!(
            "Profile '{profile_name}' is ready. Run `booxsync auth login --email <email> --password <password>`."
        );
    }
    Ok(())
}

pub fn run_config_show(profile_name: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile_name);
    let Some(profile) = config.profile(&profile_name) else {
        println!("Profile '{profile_name}' is not configured.");
        return Ok(());
    };

    let library_dir = match &profile.library_dir {
        Some(dir) => dir.clone(),
        None => default_library_dir(&profile_name)?,
    };
    let active = config.active_profile.as_deref() == Some(profile_name.as_str());

    println!("profile:      {profile_name}{}", if active { " (active)" } else { "" });
    println!("backend_url:  {}", display_value(profile.backend_url.as_deref()));
    println!("realtime_url: {}", display_value(profile.realtime_url.as_deref()));
    println!(
        "realtime_key: {}",
        profile
            .realtime_api_key
            .as_deref()
            .map_or_else(|| "(not set)".to_string(), redact)
    );
    println!("library_dir:  {}", library_dir.display());
    println!("database:     {}", resolve_db_path(None, &profile_name)?.display());
    Ok(())
}

fn display_value(value: Option<&str>) -> &str {
    value.unwrap_or("(not set)")
}

/// Keep only the first four characters of a key.
fn redact(key: &str) -> String {
    let visible = key.chars().take(4).collect::<String>();
    format!("{visible}…")
}

fn is_socket_url(value: &str) -> bool {
    is_http_url(value) || value.starts_with("ws://") || value.starts_with("wss://")
}

fn validate_profile(profile: &CliProfile) -> Result<(), CliError> {
    if let Some(url) = profile.backend_url.as_deref() {
        if !is_http_url(url) {
            return Err(CliError::Config(
                "backend_url must include http:// or https://".to_string(),
            ));
        }
    }
    if let Some(url) = profile.realtime_url.as_deref() {
        if !is_socket_url(url) {
            return Err(CliError::Config(
                "realtime_url must include ws://, wss://, http:// or https://".to_string(),
            ));
        }
    }
    if profile.realtime_url.is_some() != profile.realtime_api_key.is_some() {
        return Err(CliError::Config(
            "realtime_url and realtime_key must be set together".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn profile(backend: &str) -> CliProfile {
        CliProfile {
            backend_url: Some(backend.to_string()),
            ..CliProfile::default()
        }
    }

    #[test]
    fn validate_profile_rejects_non_http_backend() {
        assert!(validate_profile(&profile("https://books.example.com")).is_ok());
        let error = validate_profile(&profile("books.example.com")).unwrap_err();
        assert!(error.to_string().contains("backend_url"));
    }

    #[test]
    fn validate_profile_requires_realtime_pair() {
        let mut half = profile("https://books.example.com");
        half.realtime_url = Some("wss://rt.example.com/socket".to_string());
        assert!(validate_profile(&half).is_err());

        half.realtime_api_key = Some("anon".to_string());
        assert!(validate_profile(&half).is_ok());
    }

    #[test]
    fn redact_keeps_prefix_only() {
        assert_eq!(redact("anon-key-123"), "anon…");
        assert_eq!(redact("ab"), "ab…");
    }
}
