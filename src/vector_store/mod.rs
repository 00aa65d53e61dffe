//! HTTP vector store client for chunk embeddings.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::config::get_config;

/// Errors surfaced by vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Transport-level failure reaching the store.
    #[error("Vector store request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The configured base URL could not be parsed.
    #[error("Invalid vector store URL: {0}")]
    InvalidUrl(String),
    /// The store answered with a non-success status.
    #[error("Vector store returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code of the response.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// One chunk ready for upsert into the vector store.
#[derive(Debug, Clone)]
pub struct ChunkPoint {
    /// Point id, shared with the chunk record.
    pub id: Uuid,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Chunk text stored in the payload.
    pub text: String,
    /// SHA-256 hex fingerprint of the chunk text.
    pub hash: String,
    /// Batch id shared by every chunk of the run.
    pub batch_id: Uuid,
    /// Run the chunk belongs to.
    pub run_id: Uuid,
    /// Caller-supplied source label, when present.
    pub source_tag: Option<String>,
}

/// Interface implemented by vector storage backends.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace one chunk point, returning its storage reference.
    async fn upsert(&self, point: ChunkPoint) -> Result<String, VectorStoreError>;
}

/// Lightweight HTTP client for a Qdrant-compatible vector store.
pub struct HttpVectorStore {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

impl HttpVectorStore {
    /// Construct a client from the loaded configuration.
    pub fn from_config() -> Result<Self, VectorStoreError> {
        let config = get_config();
        Self::new(
            &config.vector_store_url,
            config.vector_collection_name.clone(),
            config.vector_store_api_key.clone(),
        )
    }

    /// Construct a client against an explicit base URL.
    pub fn new(
        base_url: &str,
        collection: String,
        api_key: Option<String>,
    ) -> Result<Self, VectorStoreError> {
        let client = Client::builder()
            .user_agent("taonga/vector")
            .build()?;
        let base_url = normalize_base_url(base_url).map_err(VectorStoreError::InvalidUrl)?;
        tracing::debug!(url = %base_url, collection = %collection, "Initialized vector store client");
        Ok(Self {
            client,
            base_url,
            collection,
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        let mut req = self.client.request(method, format!("{base}/{path}"));
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn upsert(&self, point: ChunkPoint) -> Result<String, VectorStoreError> {
        let body = json!({
            "points": [{
                "id": point.id.to_string(),
                "vector": point.vector,
                "payload": {
                    "text": point.text,
                    "chunk_hash": point.hash,
                    "batch_id": point.batch_id.to_string(),
                    "run_id": point.run_id.to_string(),
                    "source_tag": point.source_tag,
                }
            }]
        });

        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Vector upsert failed");
            return Err(error);
        }

        Ok(format!("{}/{}", self.collection, point.id))
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}
