//! Record CRUD against the backend's collection API.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::auth::{AuthPolicy, Authenticator};
use crate::{Error, Result};

/// Page order for listings. Must not depend on mutable fields.
const PAGE_SORT: &str = "id";

/// Outcome of a create call
#[derive(Debug, Clone, PartialEq)]
pub enum Created {
    Record(Value),
    /// The backend refused because a record with the same unique key exists
    Duplicate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    total_pages: u32,
}

/// Paginated JSON client for `/api/collections/{collection}/records`.
#[derive(Clone)]
pub struct RestClient {
    base_url: String,
    authenticator: Arc<Authenticator>,
    page_size: u32,
}

impl RestClient {
    pub fn new(base_url: &str, authenticator: Arc<Authenticator>, page_size: u32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            authenticator,
            page_size: page_size.max(1),
        }
    }

    fn records_url(&self, collection: &str) -> String {
        format!("{}/api/collections/{collection}/records", self.base_url)
    }

    fn record_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/{}",
            self.records_url(collection),
            urlencoding::encode(id)
        )
    }

    /// Every record matching `filter`, in record id order.
    pub async fn list(&self, collection: &str, filter: &str) -> Result<Vec<Value>> {
        let url = self.records_url(collection);
        let mut records = Vec::new();
        let mut page = 1u32;
        loop {
            let query = [
                ("filter", filter.to_string()),
                ("page", page.to_string()),
                ("perPage", self.page_size.to_string()),
                ("sort", PAGE_SORT.to_string()),
            ];
            let response = self
                .authenticator
                .send(AuthPolicy::Attach, |client| client.get(&url).query(&query))
                .await?;
            let body: Page = expect_json(response).await?;
            records.extend(body.items);
            if page >= body.total_pages {
                break;
            }
            page += 1;
        }
        tracing::debug!("Listed {} {} records", records.len(), collection);
        Ok(records)
    }

    /// First record matching `filter`.
    pub async fn find_one(&self, collection: &str, filter: &str) -> Result<Option<Value>> {
        let url = self.records_url(collection);
        let query = [
            ("filter", filter.to_string()),
            ("page", "1".to_string()),
            ("perPage", "1".to_string()),
            ("sort", "-updatedAt".to_string()),
        ];
        let response = self
            .authenticator
            .send(AuthPolicy::Attach, |client| client.get(&url).query(&query))
            .await?;
        let body: Page = expect_json(response).await?;
        Ok(body.items.into_iter().next())
    }

    /// Fetch one record; `None` when the backend no longer has it.
    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let url = self.record_url(collection, id);
        let response = self
            .authenticator
            .send(AuthPolicy::Attach, |client| client.get(&url))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        expect_json(response).await.map(Some)
    }

    pub async fn create(&self, collection: &str, payload: &Value) -> Result<Created> {
        let url = self.records_url(collection);
        let response = self
            .authenticator
            .send(AuthPolicy::Attach, |client| client.post(&url).json(payload))
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(Created::Record(response.json().await?));
        }
        let body = response.text().await.unwrap_or_default();
        if is_duplicate(status, &body) {
            tracing::debug!("Create on {} hit an existing record", collection);
            return Ok(Created::Duplicate);
        }
        Err(Error::api(status, &body))
    }

    /// PATCH the given fields onto a record.
    pub async fn update(&self, collection: &str, id: &str, payload: &Value) -> Result<Value> {
        let url = self.record_url(collection, id);
        let response = self
            .authenticator
            .send(AuthPolicy::Attach, |client| client.patch(&url).json(payload))
            .await?;
        expect_json(response).await
    }
}

async fn expect_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::api(status, &body));
    }
    Ok(response.json().await?)
}

/// 409, or a 400 whose field errors report a unique-constraint violation.
fn is_duplicate(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::CONFLICT {
        return true;
    }
    if status != StatusCode::BAD_REQUEST {
        return false;
    }
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    value
        .get("data")
        .and_then(Value::as_object)
        .is_some_and(|fields| {
            fields
                .values()
                .any(|field| field.get("code").and_then(Value::as_str) == Some("validation_not_unique"))
        })
}

/// Quote a value for use inside a filter expression.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Records owned by `user_id`.
pub fn user_filter(user_id: &str) -> String {
    format!("(user={})", quote(user_id))
}

/// Records owned by `user_id` whose `field` equals `value`.
pub fn key_filter(user_id: &str, field: &str, value: &str) -> String {
    format!("(user={} && {field}={})", quote(user_id), quote(value))
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use httpmock::Method::PATCH;
    use pretty_assertions::assert_eq;
    use reqwest::Client;
    use serde_json::json;

    use super::*;
    use crate::auth::{MemoryTokenStore, TokenStore};

    fn rest(server: &MockServer, page_size: u32) -> RestClient {
        let store = Arc::new(MemoryTokenStore::default());
        store.save_access_token("token").unwrap();
        let auth = Arc::new(Authenticator::new(Client::new(), &server.base_url(), store));
        RestClient::new(&server.base_url(), auth, page_size)
    }

    #[test]
    fn filters_escape_quotes() {
        assert_eq!(user_filter("u1"), "(user='u1')");
        assert_eq!(
            key_filter("u1", "bookId", "it's"),
            r"(user='u1' && bookId='it\'s')"
        );
    }

    #[test]
    fn duplicate_detection() {
        let unique = r#"{"data":{"bookId":{"code":"validation_not_unique","message":"taken"}}}"#;
        assert!(is_duplicate(StatusCode::BAD_REQUEST, unique));
        assert!(is_duplicate(StatusCode::CONFLICT, ""));
        assert!(!is_duplicate(StatusCode::BAD_REQUEST, r#"{"data":{}}"#));
        assert!(!is_duplicate(StatusCode::INTERNAL_SERVER_ERROR, unique));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_follows_every_page() {
        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/collections/books/records")
                    .query_param("page", "1")
                    .query_param("sort", "id")
                    .query_param("filter", "(user='u1')")
                    .header("authorization", "Bearer token");
                then.status(200).json_body(json!({
                    "page": 1, "totalPages": 2, "items": [{ "id": "a" }]
                }));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/collections/books/records")
                    .query_param("page", "2")
                    .query_param("sort", "id");
                then.status(200).json_body(json!({
                    "page": 2, "totalPages": 2, "items": [{ "id": "b" }]
                }));
            })
            .await;

        let records = rest(&server, 1).list("books", &user_filter("u1")).await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        let ids: Vec<_> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_maps_not_found_to_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/collections/books/records/gone");
                then.status(404).json_body(json!({ "message": "missing" }));
            })
            .await;

        assert_eq!(rest(&server, 10).get("books", "gone").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_reports_unique_violations() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/collections/progress/records");
                then.status(400).json_body(json!({
                    "message": "Failed to create record.",
                    "data": { "bookId": { "code": "validation_not_unique" } }
                }));
            })
            .await;

        let created = rest(&server, 10)
            .create("progress", &json!({ "bookId": "k" }))
            .await
            .unwrap();
        assert_eq!(created, Created::Duplicate);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_errors_are_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PATCH).path("/api/collections/books/records/r1");
                then.status(503).body("down");
            })
            .await;

        let error = rest(&server, 10)
            .update("books", "r1", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::TransientNetwork);
    }
}
