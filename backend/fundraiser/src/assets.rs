//! Asset storage for campaign images.
//!
//! Two backends implement [`AssetStore`]:
//!
//! * [`LocalAssetStore`] writes content-addressed files (`sha256(bytes).ext`)
//!   under a directory that the API serves at `/uploads`.
//! * [`RemoteAssetStore`] pushes binaries to an external store over HTTP,
//!   with bounded retries for transient failures.
//!
//! Both hand out one fixed placeholder URL for campaigns without images.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::input::Upload;
use crate::retry::{classify_status, classify_transport, with_backoff, RetryError, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    /// The store refused this binary; retrying will not help.
    #[error("image rejected by asset store: {0}")]
    Rejected(String),
    /// The store kept failing transiently until the retry budget ran out.
    #[error("asset store unavailable after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl From<RetryError<String>> for AssetError {
    fn from(e: RetryError<String>) -> Self {
        match e {
            RetryError::Fatal(msg) => AssetError::Rejected(msg),
            RetryError::Exhausted { attempts, last } => AssetError::Exhausted { attempts, last },
        }
    }
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store one binary and return its public URL.
    async fn upload(&self, upload: &Upload) -> Result<String, AssetError>;

    /// Store several binaries; one outcome per input, in input order.
    async fn upload_many(&self, uploads: &[Upload]) -> Vec<Result<String, AssetError>> {
        let mut out = Vec::with_capacity(uploads.len());
        for upload in uploads {
            out.push(self.upload(upload).await);
        }
        out
    }

    /// Best-effort removal. Returns whether the store confirmed the delete.
    async fn delete(&self, url: &str) -> bool;

    fn placeholder_url(&self) -> &str;
}

fn content_address(upload: &Upload) -> String {
    let digest = Sha256::digest(&upload.bytes);
    format!("{}.{}", hex::encode(digest), upload.extension())
}

// ─────────────────────────────────────────────────────────
// Local, content-addressed files
// ─────────────────────────────────────────────────────────

pub struct LocalAssetStore {
    dir: PathBuf,
    /// URL prefix the files are served under, without trailing slash.
    public_prefix: String,
    placeholder: String,
}

impl LocalAssetStore {
    pub fn new(dir: impl Into<PathBuf>, public_base_url: &str, placeholder: String) -> Self {
        Self {
            dir: dir.into(),
            public_prefix: format!("{}/uploads", public_base_url.trim_end_matches('/')),
            placeholder,
        }
    }

    /// File name for a URL this store handed out, if it is one.
    fn owned_name<'a>(&self, url: &'a str) -> Option<&'a str> {
        let name = url.strip_prefix(&self.public_prefix)?.strip_prefix('/')?;
        let safe = !name.is_empty()
            && !name.contains('/')
            && !name.contains('\\')
            && !name.contains("..");
        safe.then_some(name)
    }
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn upload(&self, upload: &Upload) -> Result<String, AssetError> {
        if upload.bytes.is_empty() {
            return Err(AssetError::Rejected(format!(
                "'{}' is empty",
                upload.file_name
            )));
        }
        let name = content_address(upload);
        let path = self.dir.join(&name);

        let io_err = |e: std::io::Error| AssetError::Exhausted {
            attempts: 1,
            last: e.to_string(),
        };

        if tokio::fs::try_exists(&path).await.map_err(io_err)? {
            debug!("Asset {name} already stored");
        } else {
            tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
            let tmp = self.dir.join(format!(".{name}.{}", uuid::Uuid::new_v4()));
            tokio::fs::write(&tmp, &upload.bytes).await.map_err(io_err)?;
            tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;
        }
        Ok(format!("{}/{name}", self.public_prefix))
    }

    async fn delete(&self, url: &str) -> bool {
        if url == self.placeholder {
            return false;
        }
        let Some(name) = self.owned_name(url) else {
            warn!("Refusing to delete asset not owned by this store: {url}");
            return false;
        };
        match tokio::fs::remove_file(self.dir.join(name)).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to delete asset {url}: {e}");
                false
            }
        }
    }

    fn placeholder_url(&self) -> &str {
        &self.placeholder
    }
}

// ─────────────────────────────────────────────────────────
// Remote store over HTTP
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
}

pub struct RemoteAssetStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    policy: RetryPolicy,
    placeholder: String,
}

impl RemoteAssetStore {
    pub fn new(
        client: Client,
        base_url: &str,
        api_key: Option<String>,
        policy: RetryPolicy,
        placeholder: String,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            policy,
            placeholder,
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.post(format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait]
impl AssetStore for RemoteAssetStore {
    async fn upload(&self, upload: &Upload) -> Result<String, AssetError> {
        if upload.bytes.is_empty() {
            return Err(AssetError::Rejected(format!(
                "'{}' is empty",
                upload.file_name
            )));
        }
        let public_id = content_address(upload);

        let url = with_backoff(self.policy, "Asset upload", || async {
            let part = reqwest::multipart::Part::bytes(upload.bytes.clone())
                .file_name(upload.file_name.clone())
                .mime_str(&upload.content_type)
                .map_err(|e| crate::retry::Attempt::Fatal(e.to_string()))?;
            let form = reqwest::multipart::Form::new()
                .text("public_id", public_id.clone())
                .part("file", part);

            let resp = self
                .post("/upload")
                .multipart(form)
                .send()
                .await
                .map_err(classify_transport)?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(classify_status(status, &body));
            }
            let body: UploadResponse = resp
                .json()
                .await
                .map_err(|e| crate::retry::Attempt::Fatal(e.to_string()))?;
            body.secure_url
                .or(body.url)
                .ok_or_else(|| crate::retry::Attempt::Fatal("upload response had no URL".into()))
        })
        .await?;

        Ok(url)
    }

    async fn delete(&self, url: &str) -> bool {
        if url == self.placeholder {
            return false;
        }
        let outcome = with_backoff(self.policy, "Asset delete", || async {
            let resp = self
                .post("/destroy")
                .json(&json!({ "url": url }))
                .send()
                .await
                .map_err(classify_transport)?;
            let status = resp.status();
            if status.is_success() {
                Ok(())
            } else {
                let body = resp.text().await.unwrap_or_default();
                Err(classify_status(status, &body))
            }
        })
        .await;

        match outcome {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to delete asset {url}: {:?}", AssetError::from(e));
                false
            }
        }
    }

    fn placeholder_url(&self) -> &str {
        &self.placeholder
    }
}
