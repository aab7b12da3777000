//! Token store, request authenticator and password sign-in.
//!
//! Every call to the backend goes through [`Authenticator::send`]. When the
//! backend answers 401 the authenticator takes the refresh lock, checks
//! whether a concurrent caller already rotated the token, and otherwise
//! performs exactly one refresh before replaying the request.

mod store;

use std::sync::Arc;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{Error, Result};

pub use store::{MemoryTokenStore, TokenPair, TokenStore};

const SIGN_IN_PATH: &str = "/api/collections/users/auth-with-password";
const REFRESH_PATH: &str = "/api/collections/users/auth-refresh";

/// A failed call may be retried once after a refresh.
const MAX_RESPONSE_CHAIN: usize = 2;

/// Identity returned by sign-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub email: Option<String>,
}

/// Whether a request carries the session's bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Attach the access token and refresh on 401
    Attach,
    /// Send as-is and never intercept (refresh calls, third-party APIs)
    SkipAuth,
}

/// Attaches credentials to outbound requests and refreshes them on 401.
pub struct Authenticator {
    client: Client,
    refresh_url: String,
    store: Arc<dyn TokenStore>,
    refresh_lock: Mutex<()>,
}

impl Authenticator {
    pub fn new(client: Client, backend_url: &str, store: Arc<dyn TokenStore>) -> Self {
        Self {
            client,
            refresh_url: format!("{}{REFRESH_PATH}", backend_url.trim_end_matches('/')),
            store,
            refresh_lock: Mutex::new(()),
        }
    }

    pub const fn client(&self) -> &Client {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Send a request built by `build`, rebuilding it for each replay.
    ///
    /// Returns `Error::Unauthenticated` when the backend still answers 401
    /// after a refreshed token, or when the refresh itself is rejected.
    pub async fn send<F>(&self, policy: AuthPolicy, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        if policy == AuthPolicy::SkipAuth {
            return Ok(build(&self.client).send().await?);
        }

        let mut token = self.store.access_token()?;
        let mut responses = 0;
        loop {
            let mut request = build(&self.client);
            if let Some(token) = &token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            responses += 1;
            if responses >= MAX_RESPONSE_CHAIN {
                return Err(Error::Unauthenticated(
                    "backend rejected the refreshed token".to_string(),
                ));
            }

            match self.refresh_after_failure(token.as_deref()).await? {
                Some(fresh) => token = Some(fresh),
                None => {
                    return Err(Error::Unauthenticated(
                        "session could not be refreshed".to_string(),
                    ))
                }
            }
        }
    }

    /// Obtain a token newer than `stale`, refreshing at most once across callers.
    async fn refresh_after_failure(&self, stale: Option<&str>) -> Result<Option<String>> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.store.access_token()?;
        if let Some(current) = current {
            if Some(current.as_str()) != stale {
                tracing::debug!("Token already refreshed by a concurrent request");
                return Ok(Some(current));
            }
        }

        let Some(refresh_token) = self.store.refresh_token()? else {
            tracing::warn!("Received 401 without a stored refresh token");
            return Ok(None);
        };

        let Some(pair) = self.request_refresh(&refresh_token).await? else {
            return Ok(None);
        };
        self.store.save_access_token(&pair.access_token)?;
        if let Some(refresh_token) = &pair.refresh_token {
            self.store.save_refresh_token(refresh_token)?;
        }
        tracing::info!("Access token refreshed");
        Ok(Some(pair.access_token))
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<Option<TokenPair>> {
        let payload = serde_json::json!({ "refresh_token": refresh_token });
        // Sent directly: the refresh call must never re-enter the 401 handling.
        let response = self
            .client
            .post(&self.refresh_url)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                "Token refresh rejected: {}",
                crate::util::parse_api_error(status, &body)
            );
            return Ok(None);
        }

        let parsed = response.json::<AuthResponse>().await?;
        Ok(parsed.into_token_pair())
    }
}

/// Password sign-in against the backend's user collection.
pub struct AuthClient {
    sign_in_url: String,
    authenticator: Arc<Authenticator>,
}

impl AuthClient {
    pub fn new(backend_url: &str, authenticator: Arc<Authenticator>) -> Self {
        Self {
            sign_in_url: format!("{}{SIGN_IN_PATH}", backend_url.trim_end_matches('/')),
            authenticator,
        }
    }

    /// Sign in and persist the issued tokens.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionUser> {
        if email.trim().is_empty() {
            return Err(Error::InvalidInput("Email is required".to_string()));
        }
        if password.trim().is_empty() {
            return Err(Error::InvalidInput("Password is required".to_string()));
        }

        let payload = serde_json::json!({
            "identity": email.trim(),
            "password": password,
        });
        let response = self
            .authenticator
            .send(AuthPolicy::SkipAuth, |client| {
                client.post(&self.sign_in_url).json(&payload)
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
                return Err(Error::Unauthenticated(crate::util::parse_api_error(
                    status, &body,
                )));
            }
            return Err(Error::api(status, &body));
        }

        let parsed = response.json::<AuthResponse>().await?;
        let user = parsed
            .user()
            .ok_or_else(|| Error::InvalidInput("Sign-in response did not include a user".into()))?;
        let pair = parsed
            .into_token_pair()
            .ok_or_else(|| Error::InvalidInput("Sign-in response did not include a token".into()))?;

        let store = self.authenticator.store();
        store.clear_tokens()?;
        store.save_access_token(&pair.access_token)?;
        if let Some(refresh_token) = &pair.refresh_token {
            store.save_refresh_token(refresh_token)?;
        }
        Ok(user)
    }

    /// Forget the stored tokens.
    pub fn sign_out(&self) -> Result<()> {
        self.authenticator.store().clear_tokens()
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: Option<String>,
    token: Option<String>,
    refresh_token: Option<String>,
    record: Option<AuthUserRecord>,
    user: Option<AuthUserRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct AuthUserRecord {
    id: String,
    email: Option<String>,
}

impl AuthResponse {
    fn user(&self) -> Option<SessionUser> {
        self.record
            .as_ref()
            .or(self.user.as_ref())
            .map(|record| SessionUser {
                id: record.id.clone(),
                email: record.email.clone(),
            })
    }

    fn into_token_pair(self) -> Option<TokenPair> {
        let access_token = crate::util::normalize_text_option(self.access_token.or(self.token))?;
        Some(TokenPair {
            access_token,
            refresh_token: crate::util::normalize_text_option(self.refresh_token),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn authenticator(server: &MockServer, store: Arc<MemoryTokenStore>) -> Arc<Authenticator> {
        Arc::new(Authenticator::new(
            Client::new(),
            &server.base_url(),
            store,
        ))
    }

    fn store_with(access: &str, refresh: &str) -> Arc<MemoryTokenStore> {
        let store = Arc::new(MemoryTokenStore::default());
        store.save_access_token(access).unwrap();
        store.save_refresh_token(refresh).unwrap();
        store
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_401s_trigger_a_single_refresh() {
        let server = MockServer::start_async().await;
        let stale = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/collections/books/records")
                    .header("authorization", "Bearer old");
                then.status(401);
            })
            .await;
        let fresh = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/collections/books/records")
                    .header("authorization", "Bearer new");
                then.status(200).json_body(json!({ "items": [] }));
            })
            .await;
        let refresh = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(REFRESH_PATH)
                    .json_body(json!({ "refresh_token": "r-old" }));
                then.status(200)
                    .json_body(json!({ "access_token": "new", "refresh_token": "r-new" }));
            })
            .await;

        let store = store_with("old", "r-old");
        let auth = authenticator(&server, store.clone());
        let url = server.url("/api/collections/books/records");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let auth = auth.clone();
            let url = url.clone();
            tasks.push(tokio::spawn(async move {
                auth.send(AuthPolicy::Attach, |client| client.get(&url))
                    .await
                    .map(|response| response.status())
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), StatusCode::OK);
        }

        assert_eq!(refresh.hits_async().await, 1);
        assert!(stale.hits_async().await >= 1);
        assert_eq!(fresh.hits_async().await, 8);
        assert_eq!(store.access_token().unwrap().as_deref(), Some("new"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r-new"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_refresh_is_an_auth_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/protected");
                then.status(401);
            })
            .await;
        let refresh = server
            .mock_async(|when, then| {
                when.method(POST).path(REFRESH_PATH);
                then.status(400).json_body(json!({ "message": "invalid refresh token" }));
            })
            .await;

        let auth = authenticator(&server, store_with("old", "r-old"));
        let url = server.url("/protected");
        let error = auth
            .send(AuthPolicy::Attach, |client| client.get(&url))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), crate::ErrorKind::AuthFailure);
        assert_eq!(refresh.hits_async().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_is_attempted_at_most_once_per_call() {
        let server = MockServer::start_async().await;
        let protected = server
            .mock_async(|when, then| {
                when.method(GET).path("/protected");
                then.status(401);
            })
            .await;
        let refresh = server
            .mock_async(|when, then| {
                when.method(POST).path(REFRESH_PATH);
                then.status(200).json_body(json!({ "token": "still-bad" }));
            })
            .await;

        let auth = authenticator(&server, store_with("old", "r-old"));
        let url = server.url("/protected");
        let result = auth.send(AuthPolicy::Attach, |client| client.get(&url)).await;

        assert!(matches!(result, Err(Error::Unauthenticated(_))));
        assert_eq!(protected.hits_async().await, 2);
        assert_eq!(refresh.hits_async().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn skip_auth_requests_are_never_intercepted() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/public");
                then.status(401);
            })
            .await;
        let refresh = server
            .mock_async(|when, then| {
                when.method(POST).path(REFRESH_PATH);
                then.status(200).json_body(json!({ "token": "new" }));
            })
            .await;

        let auth = authenticator(&server, store_with("old", "r-old"));
        let url = server.url("/public");
        let response = auth
            .send(AuthPolicy::SkipAuth, |client| client.get(&url))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(refresh.hits_async().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sign_in_saves_tokens_and_returns_user() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(SIGN_IN_PATH)
                    .json_body(json!({ "identity": "reader@example.com", "password": "pw" }));
                then.status(200).json_body(json!({
                    "token": "access-1",
                    "refresh_token": "refresh-1",
                    "record": { "id": "user-1", "email": "reader@example.com" }
                }));
            })
            .await;

        let store = Arc::new(MemoryTokenStore::default());
        let auth = authenticator(&server, store.clone());
        let client = AuthClient::new(&server.base_url(), auth);

        let user = client.sign_in(" reader@example.com ", "pw").await.unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(store.access_token().unwrap().as_deref(), Some("access-1"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("refresh-1"));

        client.sign_out().unwrap();
        assert_eq!(store.access_token().unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sign_in_rejects_blank_credentials() {
        let store = Arc::new(MemoryTokenStore::default());
        let auth = Arc::new(Authenticator::new(Client::new(), "http://127.0.0.1:9", store));
        let client = AuthClient::new("http://127.0.0.1:9", auth);
        assert!(matches!(
            client.sign_in(" ", "pw").await,
            Err(Error::InvalidInput(_))
        ));
    }
}
