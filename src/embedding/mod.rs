//! Embedding providers behind a single trait.
//!
//! The HTTP client talks to an Ollama-style embeddings endpoint. When no
//! embedding URL is configured, a deterministic hashing client keeps the
//! pipeline functional without a provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::get_config;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider could not be reached.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider was unable to produce an embedding for the supplied input.
    #[error("Failed to generate embedding: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for one chunk of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError>;
}

/// HTTP client for an Ollama-style `/api/embeddings` endpoint.
pub struct HttpEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
}

impl HttpEmbeddingClient {
    /// Create a client for the given provider base URL and model.
    pub fn new(base_url: String, model: String) -> Self {
        let http = Client::builder()
            .user_agent("taonga/embedding")
            .build()
            .expect("Failed to construct reqwest::Client for embeddings");
        Self {
            http,
            base_url,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        let payload = json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::ProviderUnavailable(format!(
                    "failed to reach embedding provider at {}: {error}",
                    self.base_url
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "provider returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| EmbeddingClientError::InvalidResponse(error.to_string()))?;
        if parsed.embedding.is_empty() {
            return Err(EmbeddingClientError::InvalidResponse(
                "provider returned an empty embedding".to_string(),
            ));
        }
        Ok(parsed.embedding)
    }
}

/// Deterministic hashing client used when no provider is configured.
pub struct DeterministicEmbeddingClient {
    dimension: usize,
}

impl DeterministicEmbeddingClient {
    /// Create a client producing vectors of the given dimension.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % self.dimension;
            // Basic hashing of content into the vector slot
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingClient for DeterministicEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(self.encode(text))
    }
}

/// Build an embedding client suitable for the current configuration.
pub fn get_embedding_client() -> Box<dyn EmbeddingClient> {
    let config = get_config();
    match &config.embedding_url {
        Some(url) => {
            tracing::debug!(url = %url, model = %config.embedding_model, "using HTTP embedding provider");
            Box::new(HttpEmbeddingClient::new(
                url.clone(),
                config.embedding_model.clone(),
            ))
        }
        None => {
            tracing::debug!(
                dimension = config.embedding_dimension,
                "no embedding provider configured, using deterministic client"
            );
            Box::new(DeterministicEmbeddingClient::new(config.embedding_dimension))
        }
    }
}
