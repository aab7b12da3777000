use std::path::Path;

use booxsync_core::realtime::{ListenerEvent, ListenerState};

use crate::commands::common::open_session;
use crate::error::CliError;

pub fn describe_event(event: &ListenerEvent) -> String {
    match event {
        ListenerEvent::StateChanged(state) => match state {
            ListenerState::Idle => "Realtime idle".to_string(),
            ListenerState::Connecting => "Connecting to realtime...".to_string(),
            ListenerState::Joined => "Listening for changes".to_string(),
            ListenerState::Reconnecting => "Connection lost, reconnecting".to_string(),
        },
        ListenerEvent::Change(action) => {
            format!("Change in {}: {}", action.table(), action.label())
        }
        ListenerEvent::ConnectionError(message) => format!("Connection error: {message}"),
    }
}

/// Follow realtime changes until Ctrl-C, applying each one locally.
pub async fn run_watch(global_profile: Option<&str>, db_path: Option<&Path>) -> Result<(), CliError> {
    let session = open_session(global_profile, db_path).await?;
    session.require_user().await?;
    let orchestrator = &session.orchestrator;

    let (listener, mut events) = orchestrator
        .realtime_listener()
        .await?
        .ok_or(CliError::RealtimeNotConfigured)?;

    // Catch up before following live changes.
    orchestrator.sync_now().await?;
    listener.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{}", describe_event(&event));
                orchestrator.dispatch(&event).await;
            }
        }
    }

    listener.stop().await;
    orchestrator.wait_for_background().await;
    println!("Stopped watching profile '{}'", session.profile_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use booxsync_core::realtime::ChangeAction;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn describe_event_names_table_and_key() {
        let event = ListenerEvent::Change(ChangeAction::Tombstone {
            table: "books".to_string(),
            key: "k1".to_string(),
            record_id: Some("r1".to_string()),
        });
        assert_eq!(describe_event(&event), "Change in books: k1");

        let note = ListenerEvent::Change(ChangeAction::Pull {
            table: "ai_notes".to_string(),
            key: String::new(),
            record_id: Some("n1".to_string()),
        });
        assert_eq!(describe_event(&note), "Change in ai_notes: n1");
        assert_eq!(
            describe_event(&ListenerEvent::StateChanged(ListenerState::Joined)),
            "Listening for changes"
        );
    }
}
