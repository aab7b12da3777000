//! Token persistence

use std::fmt;
use std::sync::RwLock;

use crate::{Error, Result};

/// Access/refresh token pair
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Holder of the current session tokens.
///
/// Implementations must be cheap to call; the authenticator reads the access
/// token before every request.
pub trait TokenStore: Send + Sync + 'static {
    fn access_token(&self) -> Result<Option<String>>;
    fn refresh_token(&self) -> Result<Option<String>>;
    fn save_access_token(&self, token: &str) -> Result<()>;
    fn save_refresh_token(&self, token: &str) -> Result<()>;
    fn clear_tokens(&self) -> Result<()>;
}

/// Process-local token store
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn with_tokens(pair: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(pair)),
        }
    }
}

fn poisoned<T>(error: std::sync::PoisonError<T>) -> Error {
    Error::Storage(format!("token store lock poisoned: {error}"))
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Result<Option<String>> {
        let tokens = self.tokens.read().map_err(poisoned)?;
        Ok(tokens
            .as_ref()
            .map(|pair| pair.access_token.clone())
            .filter(|token| !token.is_empty()))
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        let tokens = self.tokens.read().map_err(poisoned)?;
        Ok(tokens.as_ref().and_then(|pair| pair.refresh_token.clone()))
    }

    fn save_access_token(&self, token: &str) -> Result<()> {
        let mut tokens = self.tokens.write().map_err(poisoned)?;
        tokens.get_or_insert_with(TokenPair::default).access_token = token.to_string();
        Ok(())
    }

    fn save_refresh_token(&self, token: &str) -> Result<()> {
        let mut tokens = self.tokens.write().map_err(poisoned)?;
        tokens.get_or_insert_with(TokenPair::default).refresh_token = Some(token.to_string());
        Ok(())
    }

    fn clear_tokens(&self) -> Result<()> {
        let mut tokens = self.tokens.write().map_err(poisoned)?;
        *tokens = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_tokens() {
        let pair = TokenPair {
            access_token: "secret-access".into(),
            refresh_token: Some("secret-refresh".into()),
        };
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn refresh_token_survives_access_rotation() {
        let store = MemoryTokenStore::with_tokens(TokenPair {
            access_token: "a1".into(),
            refresh_token: Some("r1".into()),
        });
        store.save_access_token("a2").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("a2"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r1"));

        store.clear_tokens().unwrap();
        assert_eq!(store.refresh_token().unwrap(), None);
    }
}
