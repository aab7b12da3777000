use std::path::Path;

use booxsync_core::auth::TokenStore;

use crate::cli::AuthCommands;
use crate::commands::common::open_session;
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;
use crate::token_store::KeyringTokenStore;

pub async fn run_auth(
    command: AuthCommands,
    global_profile: Option<&str>,
    db_path: Option<&Path>,
) -> Result<(), CliError> {
    match command {
        AuthCommands::Login { email, password } => {
            let session = open_session(global_profile, db_path).await?;
            let user = session.orchestrator.login(&email, &password).await?;
            let email_label = user.email.as_deref().unwrap_or("(no email)");
            println!(
                "Signed in profile '{}' as {}",
                session.profile_name, email_label
            );

            let library = session.orchestrator.database().list_library().await?;
            println!("{} books in library", library.len());
            Ok(())
        }
        AuthCommands::Status => {
            let session = match open_session(global_profile, db_path).await {
                Ok(session) => session,
                Err(CliError::Config(message)) => {
                    println!("{message}");
                    return Ok(());
                }
                Err(error) => return Err(error),
            };
            let tokens = KeyringTokenStore::new(&session.profile_name);
            let has_refresh = tokens.refresh_token()?.is_some();

            match session.orchestrator.current_user().await? {
                Some(user) if has_refresh => {
                    let email_label = user.email.as_deref().unwrap_or("(no email)");
                    println!(
                        "Profile '{}' is signed in as {} (user {})",
                        session.profile_name, email_label, user.id
                    );
                }
                Some(user) => {
                    println!(
                        "Profile '{}' has local data for user {} but no stored session. Run `booxsync auth login`.",
                        session.profile_name, user.id
                    );
                }
                None => println!("Profile '{}' is not signed in.", session.profile_name),
            }
            Ok(())
        }
        AuthCommands::Logout => {
            match open_session(global_profile, db_path).await {
                Ok(session) => {
                    session.orchestrator.logout().await?;
                    println!("Signed out profile '{}'", session.profile_name);
                }
                Err(CliError::Config(_)) => {
                    let config = CliProfilesConfig::load()?;
                    let profile_name = config.resolve_profile_name(global_profile);
                    KeyringTokenStore::new(&profile_name).clear_tokens()?;
                    println!("Signed out profile '{profile_name}'");
                }
                Err(error) => return Err(error),
            }
            Ok(())
        }
    }
}
