use std::io::{self, Write};
use std::path::Path;

use booxsync_core::models::{AiNote, AiProfile, ChatTurn};
use booxsync_core::streaming::ChatRequest;

use crate::commands::common::open_session;
use crate::error::CliError;

/// Profile used when none is named: the active one, else the first live one.
pub fn pick_default_profile(
    profiles: Vec<AiProfile>,
    active_remote_id: Option<&str>,
) -> Option<AiProfile> {
    let mut first = None;
    for profile in profiles.into_iter().filter(|profile| !profile.sync.deleted) {
        if active_remote_id.is_some() && profile.sync.remote_id.as_deref() == active_remote_id {
            return Some(profile);
        }
        if first.is_none() {
            first = Some(profile);
        }
    }
    first
}

/// Suffix of the cumulative answer not yet written out.
fn unseen_suffix<'a>(text: &'a str, printed: usize) -> &'a str {
    text.get(printed..).unwrap_or_default()
}

pub async fn run_ask(
    text: &[String],
    ai_profile: Option<&str>,
    book_key: Option<&str>,
    global_profile: Option<&str>,
    db_path: Option<&Path>,
) -> Result<(), CliError> {
    let question = text.join(" ").trim().to_string();
    if question.is_empty() {
        return Err(CliError::EmptyQuestion);
    }

    let session = open_session(global_profile, db_path).await?;
    session.require_user().await?;
    let orchestrator = &session.orchestrator;
    let db = orchestrator.database();

    let profile = if let Some(name) = ai_profile {
        db.find_profile(name)
            .await?
            .ok_or_else(|| CliError::AiProfileNotFound(name.to_string()))?
    } else {
        let settings = db.load_settings().await?;
        pick_default_profile(
            db.list_profiles().await?,
            settings.active_profile_remote_id.as_deref(),
        )
        .ok_or(CliError::NoAiProfiles)?
    };
    tracing::debug!("Asking profile '{}' ({})", profile.name, profile.model_name);

    let mut note = AiNote::new(book_key.map(ToString::to_string), question);
    if let Some(key) = book_key {
        note.book_title = db
            .get_library_item(key)
            .await?
            .and_then(|item| item.title);
    }
    note.profile_remote_id = profile.sync.remote_id.clone();

    let request = ChatRequest::from_profile(&profile, &note.turns);
    let mut stdout = io::stdout();
    let mut printed = 0;
    let answer = orchestrator
        .streaming()
        .stream(&request, |cumulative| {
            let suffix = unseen_suffix(cumulative, printed);
            if !suffix.is_empty() {
                let _ = stdout.write_all(suffix.as_bytes());
                let _ = stdout.flush();
            }
            printed = cumulative.len();
        })
        .await;
    println!();

    let answer = answer.ok_or(CliError::NoAnswer)?;
    note.turns.push(ChatTurn::assistant(answer.clone()));
    note.ai_response = Some(answer);

    let saved = orchestrator.save_note(&note).await?;
    orchestrator.wait_for_background().await;
    tracing::info!("Saved note {}", saved.local_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn profile(name: &str, remote_id: Option<&str>) -> AiProfile {
        let mut profile = AiProfile::new(name, "model", "https://llm.example.com/v1/chat");
        profile.sync.remote_id = remote_id.map(ToString::to_string);
        profile
    }

    fn names(picked: Option<AiProfile>) -> Option<String> {
        picked.map(|profile| profile.name)
    }

    #[test]
    fn default_profile_prefers_active_remote_id() {
        let profiles = vec![profile("Fast", Some("p1")), profile("Careful", Some("p2"))];
        assert_eq!(
            names(pick_default_profile(profiles, Some("p2"))),
            Some("Careful".to_string())
        );
    }

    #[test]
    fn default_profile_falls_back_to_first_live() {
        let mut deleted = profile("Old", Some("p0"));
        deleted.sync.deleted = true;
        let profiles = vec![deleted, profile("Fast", Some("p1"))];

        assert_eq!(
            names(pick_default_profile(profiles.clone(), Some("missing"))),
            Some("Fast".to_string())
        );
        assert_eq!(
            names(pick_default_profile(profiles, None)),
            Some("Fast".to_string())
        );
        assert_eq!(names(pick_default_profile(Vec::new(), None)), None);
    }

    #[test]
    fn unseen_suffix_prints_only_new_text() {
        assert_eq!(unseen_suffix("Hello", 0), "Hello");
        assert_eq!(unseen_suffix("Hello, world", 5), ", world");
        assert_eq!(unseen_suffix("Hi", 5), "");
    }
}
