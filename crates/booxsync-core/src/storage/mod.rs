//! Object storage client for library files.
//!
//! Files are attached to `books` records as a multipart field and served
//! back from the backend's file endpoint. Downloads land in a sandbox
//! directory through a `.part` file that is renamed into place once complete.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{header, StatusCode};
use tokio::io::AsyncWriteExt;

use crate::auth::{AuthPolicy, Authenticator};
use crate::util::{sanitize_file_component, sha256_hex};
use crate::{Error, Result};

/// Multipart field holding the publication file.
pub const FILE_FIELD: &str = "bookFile";

const EPUB_MIME: &str = "application/epub+zip";
const PART_SUFFIX: &str = ".part";

/// What a probe learned about a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFileState {
    Present,
    Missing,
    /// The backend answered with something inconclusive
    Unknown,
}

impl RemoteFileState {
    fn from_status(status: StatusCode) -> Self {
        if status.is_success()
            || status == StatusCode::NOT_MODIFIED
            || status == StatusCode::RANGE_NOT_SATISFIABLE
        {
            Self::Present
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            Self::Missing
        } else {
            Self::Unknown
        }
    }
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// `{recordId}/{fileName}`
    pub storage_path: String,
    /// Name the backend stored the file under
    pub file_name: String,
}

/// Deterministic object name derived from file content.
pub fn object_file_name(content: &[u8]) -> String {
    let digest = sha256_hex(content);
    format!("{}.epub", &digest[..16])
}

/// Local file name for a downloaded object.
pub fn sandbox_file_name(record_id: &str, file_name: &str) -> String {
    format!(
        "{}-{}",
        sanitize_file_component(record_id),
        sanitize_file_component(file_name)
    )
}

/// Split `{recordId}/{fileName}` into its parts.
pub fn split_storage_path(storage_path: &str) -> Option<(&str, &str)> {
    let (record_id, file_name) = storage_path.trim_matches('/').split_once('/')?;
    if record_id.is_empty() || file_name.is_empty() || file_name.contains('/') {
        return None;
    }
    Some((record_id, file_name))
}

/// Uploads, probes and downloads files attached to library records.
pub struct ObjectStorageClient {
    base_url: String,
    collection: String,
    authenticator: Arc<Authenticator>,
    download_timeout: Duration,
}

impl ObjectStorageClient {
    pub fn new(
        base_url: &str,
        collection: impl Into<String>,
        authenticator: Arc<Authenticator>,
        download_timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.into(),
            authenticator,
            download_timeout,
        }
    }

    /// Public URL of a stored file.
    pub fn file_url(&self, record_id: &str, file_name: &str) -> String {
        format!(
            "{}/api/files/{}/{}/{}",
            self.base_url,
            self.collection,
            urlencoding::encode(record_id),
            urlencoding::encode(file_name)
        )
    }

    /// Attach `content` to the record as its book file.
    ///
    /// The file is named from its content hash, so re-uploading identical bytes
    /// produces the same name. The name reported back by the backend wins.
    pub async fn upload(&self, record_id: &str, content: &[u8]) -> Result<UploadedFile> {
        if content.is_empty() {
            return Err(Error::InvalidInput("Refusing to upload an empty file".into()));
        }
        let file_name = object_file_name(content);
        let url = format!(
            "{}/api/collections/{}/records/{}",
            self.base_url,
            self.collection,
            urlencoding::encode(record_id)
        );

        let response = self
            .authenticator
            .send(AuthPolicy::Attach, |client| {
                let part = Part::bytes(content.to_vec())
                    .file_name(file_name.clone())
                    .mime_str(EPUB_MIME)
                    .unwrap_or_else(|_| Part::bytes(content.to_vec()).file_name(file_name.clone()));
                client
                    .patch(&url)
                    .multipart(Form::new().part(FILE_FIELD, part))
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(status, &body));
        }

        let record: serde_json::Value = response.json().await?;
        let stored_name = record
            .get(FILE_FIELD)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or(file_name, ToString::to_string);

        tracing::info!("Uploaded book file for record {}", record_id);
        Ok(UploadedFile {
            storage_path: format!("{record_id}/{stored_name}"),
            file_name: stored_name,
        })
    }

    /// Check whether a stored object is still reachable.
    pub async fn probe(&self, storage_path: &str) -> Result<RemoteFileState> {
        let Some((record_id, file_name)) = split_storage_path(storage_path) else {
            return Ok(RemoteFileState::Missing);
        };
        let url = self.file_url(record_id, file_name);

        let response = self
            .authenticator
            .send(AuthPolicy::Attach, |client| client.head(&url))
            .await?;
        let status = response.status();
        if status != StatusCode::METHOD_NOT_ALLOWED && status != StatusCode::NOT_IMPLEMENTED {
            return Ok(RemoteFileState::from_status(status));
        }

        tracing::debug!("HEAD not supported for {}, probing with a ranged GET", url);
        let response = self
            .authenticator
            .send(AuthPolicy::Attach, |client| {
                client.get(&url).header(header::RANGE, "bytes=0-0")
            })
            .await?;
        Ok(RemoteFileState::from_status(response.status()))
    }

    /// Download a stored object into `dir`, returning the local path.
    ///
    /// An existing non-empty file with the expected name is reused.
    pub async fn download_to(&self, storage_path: &str, dir: &Path) -> Result<PathBuf> {
        let (record_id, file_name) = split_storage_path(storage_path).ok_or_else(|| {
            Error::InvalidInput(format!("Invalid storage path: {storage_path}"))
        })?;
        let target = dir.join(sandbox_file_name(record_id, file_name));
        if is_non_empty_file(&target).await {
            tracing::debug!("Book file already present at {}", target.display());
            return Ok(target);
        }

        tokio::fs::create_dir_all(dir).await?;
        let url = self.file_url(record_id, file_name);
        let timeout = self.download_timeout;
        let response = self
            .authenticator
            .send(AuthPolicy::Attach, |client| client.get(&url).timeout(timeout))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(status, &body));
        }

        let partial = part_path(&target);
        if let Err(error) = write_body(response, &partial).await {
            tokio::fs::remove_file(&partial).await.ok();
            return Err(error);
        }
        tokio::fs::rename(&partial, &target).await?;

        tracing::info!("Downloaded book file to {}", target.display());
        Ok(target)
    }
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

async fn is_non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file() && metadata.len() > 0)
}

async fn write_body(response: reqwest::Response, path: &Path) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0_u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    if written == 0 {
        return Err(Error::Storage("Downloaded file is empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use httpmock::Method::{HEAD, PATCH};
    use pretty_assertions::assert_eq;
    use reqwest::Client;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::auth::{MemoryTokenStore, TokenStore};

    fn storage(server: &MockServer) -> ObjectStorageClient {
        let store = Arc::new(MemoryTokenStore::default());
        store.save_access_token("token").unwrap();
        let auth = Arc::new(Authenticator::new(Client::new(), &server.base_url(), store));
        ObjectStorageClient::new(&server.base_url(), "books", auth, Duration::from_secs(5))
    }

    #[test]
    fn object_file_name_is_content_addressed() {
        let first = object_file_name(b"same bytes");
        assert_eq!(first, object_file_name(b"same bytes"));
        assert_ne!(first, object_file_name(b"other bytes"));
        assert_eq!(first.len(), 16 + ".epub".len());
    }

    #[test]
    fn sandbox_file_name_is_sanitized() {
        assert_eq!(sandbox_file_name("rec 1", "a/b.epub"), "rec_1-a_b.epub");
    }

    #[test]
    fn split_storage_path_requires_both_parts() {
        assert_eq!(split_storage_path("r1/a.epub"), Some(("r1", "a.epub")));
        assert_eq!(split_storage_path("r1"), None);
        assert_eq!(split_storage_path("/a.epub"), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_adopts_server_file_name() {
        let server = MockServer::start_async().await;
        let upload = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/api/collections/books/records/r1")
                    .header("authorization", "Bearer token");
                then.status(200)
                    .json_body(json!({ "id": "r1", "bookFile": "abc_x1y2.epub" }));
            })
            .await;

        let uploaded = storage(&server).upload("r1", b"epub bytes").await.unwrap();

        upload.assert_async().await;
        assert_eq!(uploaded.storage_path, "r1/abc_x1y2.epub");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_falls_back_to_ranged_get() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(HEAD).path("/api/files/books/r1/a.epub");
                then.status(405);
            })
            .await;
        let ranged = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/files/books/r1/a.epub")
                    .header("range", "bytes=0-0");
                then.status(206).body("P");
            })
            .await;

        let state = storage(&server).probe("r1/a.epub").await.unwrap();

        assert_eq!(state, RemoteFileState::Present);
        ranged.assert_async().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_reports_missing_objects() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(HEAD).path("/api/files/books/r1/gone.epub");
                then.status(404);
            })
            .await;

        let state = storage(&server).probe("r1/gone.epub").await.unwrap();
        assert_eq!(state, RemoteFileState::Missing);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_renames_completed_file_and_reuses_it() {
        let server = MockServer::start_async().await;
        let file = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/files/books/r1/a.epub");
                then.status(200).body("book content");
            })
            .await;
        let dir = tempdir().unwrap();
        let client = storage(&server);

        let path = client.download_to("r1/a.epub", dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("r1-a.epub"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "book content");
        assert!(!part_path(&path).exists());

        client.download_to("r1/a.epub", dir.path()).await.unwrap();
        assert_eq!(file.hits_async().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_download_leaves_no_target() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/files/books/r1/a.epub");
                then.status(500);
            })
            .await;
        let dir = tempdir().unwrap();

        let error = storage(&server)
            .download_to("r1/a.epub", dir.path())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), crate::ErrorKind::TransientNetwork);
        assert!(!dir.path().join("r1-a.epub").exists());
    }
}
