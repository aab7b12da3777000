//! Keychain-backed token persistence, one entry pair per CLI profile.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;

use booxsync_core::auth::TokenStore;
use booxsync_core::{Error, Result};

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "booxsync-cli";

/// Token store writing to the OS keychain
#[derive(Clone)]
pub struct KeyringTokenStore {
    access_username: String,
    refresh_username: String,
}

fn secure_storage_error(error: impl std::fmt::Display) -> Error {
    Error::Storage(format!("Keychain access failed: {error}"))
}

impl KeyringTokenStore {
    pub fn new(profile_name: &str) -> Self {
        Self {
            access_username: format!("access_token:{profile_name}"),
            refresh_username: format!("refresh_token:{profile_name}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn read(username: &str) -> Result<Option<String>> {
        let entry = Entry::new(KEYRING_SERVICE_NAME, username).map_err(secure_storage_error)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(secure_storage_error(error)),
        }
    }

    #[cfg(test)]
    fn read(username: &str) -> Result<Option<String>> {
        let guard = Self::test_store().lock().map_err(secure_storage_error)?;
        Ok(guard.get(username).cloned())
    }

    #[cfg(not(test))]
    fn write(username: &str, value: &str) -> Result<()> {
        Entry::new(KEYRING_SERVICE_NAME, username)
            .and_then(|entry| entry.set_password(value))
            .map_err(secure_storage_error)
    }

    #[cfg(test)]
    fn write(username: &str, value: &str) -> Result<()> {
        let mut guard = Self::test_store().lock().map_err(secure_storage_error)?;
        guard.insert(username.to_string(), value.to_string());
        Ok(())
    }

    #[cfg(not(test))]
    fn remove(username: &str) -> Result<()> {
        let entry = Entry::new(KEYRING_SERVICE_NAME, username).map_err(secure_storage_error)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(secure_storage_error(error)),
        }
    }

    #[cfg(test)]
    fn remove(username: &str) -> Result<()> {
        let mut guard = Self::test_store().lock().map_err(secure_storage_error)?;
        guard.remove(username);
        Ok(())
    }
}

impl TokenStore for KeyringTokenStore {
    fn access_token(&self) -> Result<Option<String>> {
        Self::read(&self.access_username)
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        Self::read(&self.refresh_username)
    }

    fn save_access_token(&self, token: &str) -> Result<()> {
        Self::write(&self.access_username, token)
    }

    fn save_refresh_token(&self, token: &str) -> Result<()> {
        Self::write(&self.refresh_username, token)
    }

    fn clear_tokens(&self) -> Result<()> {
        Self::remove(&self.access_username)?;
        Self::remove(&self.refresh_username)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn tokens_are_scoped_per_profile() {
        let work = KeyringTokenStore::new("token-test-work");
        let home = KeyringTokenStore::new("token-test-home");
        work.save_access_token("work-access").unwrap();
        work.save_refresh_token("work-refresh").unwrap();

        assert_eq!(work.access_token().unwrap().as_deref(), Some("work-access"));
        assert_eq!(work.refresh_token().unwrap().as_deref(), Some("work-refresh"));
        assert_eq!(home.access_token().unwrap(), None);
    }

    #[test]
    fn clear_removes_both_tokens() {
        let store = KeyringTokenStore::new("token-test-clear");
        store.save_access_token("access").unwrap();
        store.save_refresh_token("refresh").unwrap();

        store.clear_tokens().unwrap();
        store.clear_tokens().unwrap();

        assert_eq!(store.access_token().unwrap(), None);
        assert_eq!(store.refresh_token().unwrap(), None);
    }
}
