use std::path::Path;

use crate::commands::common::{
    format_sync_conflict_lines, format_sync_summary_lines, open_session, sync_conflict_to_item,
    SyncConflictItem,
};
use crate::error::CliError;

/// Which passes `booxsync sync` runs
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncMode {
    Full,
    PullOnly,
    PushOnly,
}

pub async fn run_sync(
    mode: SyncMode,
    global_profile: Option<&str>,
    db_path: Option<&Path>,
) -> Result<(), CliError> {
    let session = open_session(global_profile, db_path).await?;
    session.require_user().await?;

    let orchestrator = &session.orchestrator;
    let summary = match mode {
        SyncMode::Full => orchestrator.sync_now().await?,
        SyncMode::PullOnly => orchestrator.pull_all().await?,
        SyncMode::PushOnly => orchestrator.push_local().await?,
    };

    let lines = format_sync_summary_lines(&summary);
    if lines.is_empty() {
        println!("Already up to date");
    }
    for line in lines {
        println!("{line}");
    }
    println!("Sync completed");
    Ok(())
}

pub async fn run_sync_conflicts(
    limit: usize,
    as_json: bool,
    global_profile: Option<&str>,
    db_path: Option<&Path>,
) -> Result<(), CliError> {
    let session = open_session(global_profile, db_path).await?;
    let conflicts = session.orchestrator.database().list_conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
