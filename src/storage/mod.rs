//! Artifact persistence: remote object storage with local fallback.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::processing::types::{ArtifactBackend, ArtifactRef};

/// Errors surfaced by artifact storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Transport-level failure reaching the remote store.
    #[error("Object store request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The remote store answered with a non-success status.
    #[error("Object store returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code of the response.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
    /// Local filesystem write failed.
    #[error("Local artifact write failed for {path}: {source}")]
    Io {
        /// Target path of the failed write.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Interface implemented by object storage backends.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the bytes under the given backend-relative path.
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

/// Remote object store speaking plain HTTP PUT.
pub struct HttpObjectStore {
    http: Client,
    base_url: String,
}

impl HttpObjectStore {
    /// Create a client for the given store base URL.
    pub fn new(base_url: String) -> Self {
        let http = Client::builder()
            .user_agent("taonga/storage")
            .build()
            .expect("Failed to construct reqwest::Client for object storage");
        Self { http, base_url }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let response = self.http.put(&url).body(bytes.to_vec()).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::UnexpectedStatus { status, body });
        }
        Ok(())
    }
}

/// Object store writing under a local root directory.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let target = self.root.join(path.trim_start_matches('/'));
        let display = target.display().to_string();
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    path: display.clone(),
                    source,
                })?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|source| StorageError::Io {
                path: display,
                source,
            })
    }
}

/// Remote-first artifact store with a local fallback.
///
/// A remote failure is logged and the write retried against the local
/// backend; only a local failure propagates to the caller.
pub struct ArtifactStore {
    remote: Option<Box<dyn ObjectStore>>,
    local: Box<dyn ObjectStore>,
}

impl ArtifactStore {
    /// Assemble a store from an optional remote backend and the local root.
    pub fn new(remote: Option<Box<dyn ObjectStore>>, local: Box<dyn ObjectStore>) -> Self {
        Self { remote, local }
    }

    /// Persist an artifact, recording which backend accepted it.
    ///
    /// A remote failure is carried on the returned reference so callers can
    /// see the write was degraded.
    pub async fn store(&self, path: &str, bytes: &[u8]) -> Result<ArtifactRef, StorageError> {
        let mut remote_error = None;
        if let Some(remote) = &self.remote {
            match remote.put(path, bytes).await {
                Ok(()) => {
                    return Ok(ArtifactRef {
                        location: path.to_string(),
                        backend: ArtifactBackend::Remote,
                        error: None,
                    });
                }
                Err(error) => {
                    tracing::warn!(path, %error, "remote artifact write failed, falling back to local");
                    remote_error = Some(error.to_string());
                }
            }
        }

        self.local.put(path, bytes).await?;
        Ok(ArtifactRef {
            location: path.to_string(),
            backend: ArtifactBackend::Local,
            error: remote_error,
        })
    }
}
