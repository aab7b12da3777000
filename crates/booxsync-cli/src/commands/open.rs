use std::path::Path;

use crate::commands::common::open_session;
use crate::error::CliError;

/// Print a readable local path for `book_key`, downloading the file if needed.
pub async fn run_open(
    book_key: &str,
    global_profile: Option<&str>,
    db_path: Option<&Path>,
) -> Result<(), CliError> {
    let session = open_session(global_profile, db_path).await?;
    let path = session.orchestrator.open_book(book_key).await?;
    println!("{}", path.display());
    session.orchestrator.wait_for_background().await;
    Ok(())
}
