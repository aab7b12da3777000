use std::path::Path;

use booxsync_core::models::{FileRef, LibraryItem};
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, open_session};
use crate::error::CliError;

const TITLE_WIDTH: usize = 36;

#[derive(Debug, Serialize)]
pub struct LibraryListItem {
    pub book_key: String,
    pub title: String,
    pub file: &'static str,
    pub location: Option<String>,
    pub completed: bool,
    pub last_opened_at: i64,
    pub last_opened_iso: String,
    pub is_synced: bool,
}

/// Where the book's file currently is, as shown to the user.
fn file_state(file: &FileRef) -> &'static str {
    match file {
        FileRef::Local(path) if path.is_file() => "local",
        FileRef::Local(_) => "missing",
        FileRef::Remote(_) => "remote",
        FileRef::Placeholder => "metadata",
    }
}

pub fn library_item_to_list_item(item: &LibraryItem) -> LibraryListItem {
    LibraryListItem {
        book_key: item.book_key.clone(),
        title: item.display_title().to_string(),
        file: file_state(&item.file),
        location: item.last_locator.as_ref().map(|locator| {
            locator
                .title()
                .map_or_else(|| locator.href().to_string(), ToString::to_string)
        }),
        completed: item.completed,
        last_opened_at: item.last_opened_at,
        last_opened_iso: format_sync_timestamp(item.last_opened_at),
        is_synced: item.sync.is_synced,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    truncated.push_str("...");
    truncated
}

pub fn format_library_lines(items: &[LibraryListItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let title = truncate(&item.title, TITLE_WIDTH);
            let mut flags = Vec::new();
            if item.completed {
                flags.push("done");
            }
            if !item.is_synced {
                flags.push("pending");
            }
            let location = item.location.as_deref().unwrap_or("-");
            let line = format!(
                "{:<16}  {title:<TITLE_WIDTH$}  {:<8}  {location}",
                truncate(&item.book_key, 16),
                item.file
            );
            if flags.is_empty() {
                line
            } else {
                format!("{line}  [{}]", flags.join(", "))
            }
        })
        .collect()
}

pub async fn run_library_list(
    as_json: bool,
    global_profile: Option<&str>,
    db_path: Option<&Path>,
) -> Result<(), CliError> {
    let session = open_session(global_profile, db_path).await?;
    let items = session
        .orchestrator
        .database()
        .list_library()
        .await?
        .iter()
        .map(library_item_to_list_item)
        .collect::<Vec<_>>();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("Library is empty.");
        return Ok(());
    }

    for line in format_library_lines(&items) {
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use booxsync_core::models::Locator;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn file_state_checks_local_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("book.epub");
        std::fs::write(&path, b"epub").unwrap();

        assert_eq!(file_state(&FileRef::Local(path)), "local");
        assert_eq!(
            file_state(&FileRef::Local(dir.path().join("gone.epub"))),
            "missing"
        );
        assert_eq!(file_state(&FileRef::Remote("r1/a.epub".to_string())), "remote");
        assert_eq!(file_state(&FileRef::Placeholder), "metadata");
    }

    #[test]
    fn list_lines_show_location_and_flags() {
        let mut item = LibraryItem::new_local(
            "k1",
            Some("Dream of the Red Chamber".to_string()),
            PathBuf::from("/nonexistent/k1.epub"),
        );
        item.completed = true;
        item.last_locator =
            Some(Locator::parse(r#"{"href":"ch3.xhtml","title":"Chapter 3"}"#).unwrap());

        let list_item = library_item_to_list_item(&item);
        assert_eq!(list_item.location.as_deref(), Some("Chapter 3"));
        assert_eq!(list_item.file, "missing");

        let lines = format_library_lines(&[list_item]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("k1  "));
        assert!(lines[0].contains("Dream of the Red Chamber"));
        assert!(lines[0].ends_with("Chapter 3  [done, pending]"));
    }

    #[test]
    fn truncate_marks_cut_titles() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long title", 10), "a very ...");
    }
}
