//! Dropbox storage over the HTTP API v2.
//!
//! Uses a pre-issued bearer token. Token issuance and refresh are handled
//! outside this crate.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::{Storage, StorageEntry, normalize_path};
use crate::error::StorageError;

const API_BASE: &str = "https://api.dropboxapi.com/2";
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

/// Dropbox-backed storage.
pub struct DropboxStorage {
    client: reqwest::Client,
    token: SecretString,
    api_base: String,
    content_base: String,
}

#[derive(Debug, Deserialize)]
struct ListFolderResponse {
    entries: Vec<ListEntry>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    #[serde(rename = ".tag")]
    tag: String,
    #[serde(default)]
    path_lower: Option<String>,
    #[serde(default)]
    path_display: Option<String>,
    #[serde(default)]
    size: u64,
}

impl DropboxStorage {
    /// Create a client using the public Dropbox endpoints.
    pub fn new(token: SecretString) -> Self {
        Self::with_endpoints(token, API_BASE, CONTENT_BASE)
    }

    /// Create a client against custom endpoints (proxies, tests).
    pub fn with_endpoints(token: SecretString, api_base: &str, content_base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            api_base: api_base.trim_end_matches('/').to_string(),
            content_base: content_base.trim_end_matches('/').to_string(),
        }
    }

    fn request_failed(reason: impl Into<String>) -> StorageError {
        StorageError::RequestFailed {
            backend: "dropbox".into(),
            reason: reason.into(),
        }
    }

    /// Map a non-success response to a `StorageError`.
    async fn error_for(response: reqwest::Response, path: &str) -> StorageError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            return StorageError::AuthFailed {
                backend: "dropbox".into(),
            };
        }
        if status == StatusCode::CONFLICT && body.contains("not_found") {
            return StorageError::NotFound(path.to_string());
        }
        Self::request_failed(format!("HTTP {status}: {}", body.chars().take(300).collect::<String>()))
    }

    async fn list_page(&self, url: &str, body: serde_json::Value, root: &str) -> Result<ListFolderResponse, StorageError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::request_failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_for(response, root).await);
        }
        response
            .json::<ListFolderResponse>()
            .await
            .map_err(|e| Self::request_failed(format!("invalid list_folder response: {e}")))
    }
}

/// Dropbox root is the empty string, everything else is `/`-prefixed.
fn dropbox_path(logical: &str) -> Result<String, StorageError> {
    let normalized = normalize_path(logical)?;
    Ok(if normalized == "/" { String::new() } else { normalized })
}

/// JSON for the `Dropbox-API-Arg` header. HTTP headers must be ASCII, so
/// non-ASCII characters are escaped as `\uXXXX`.
fn header_json(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[async_trait]
impl Storage for DropboxStorage {
    fn name(&self) -> &str {
        "dropbox"
    }

    async fn list(&self, root: &str) -> Result<Vec<StorageEntry>, StorageError> {
        let path = dropbox_path(root)?;
        let mut page = self
            .list_page(
                &format!("{}/files/list_folder", self.api_base),
                serde_json::json!({ "path": path, "recursive": true }),
                root,
            )
            .await?;

        let mut entries = Vec::new();
        loop {
            for entry in page.entries.drain(..) {
                if entry.tag != "file" {
                    continue;
                }
                if let Some(p) = entry.path_lower.or(entry.path_display) {
                    entries.push(StorageEntry::new(p, entry.size));
                }
            }
            if !page.has_more {
                break;
            }
            page = self
                .list_page(
                    &format!("{}/files/list_folder/continue", self.api_base),
                    serde_json::json!({ "cursor": page.cursor }),
                    root,
                )
                .await?;
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(root, count = entries.len(), "Listed Dropbox folder");
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let arg = header_json(&serde_json::json!({ "path": dropbox_path(path)? }));
        let response = self
            .client
            .post(format!("{}/files/download", self.content_base))
            .bearer_auth(self.token.expose_secret())
            .header("Dropbox-API-Arg", arg)
            .send()
            .await
            .map_err(|e| Self::request_failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_for(response, path).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::request_failed(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let arg = header_json(&serde_json::json!({
            "path": dropbox_path(path)?,
            "mode": "overwrite",
            "mute": true,
        }));
        let response = self
            .client
            .post(format!("{}/files/upload", self.content_base))
            .bearer_auth(self.token.expose_secret())
            .header("Dropbox-API-Arg", arg)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| Self::request_failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_for(response, path).await);
        }
        debug!(path, bytes = data.len(), "Uploaded to Dropbox");
        Ok(())
    }
}
