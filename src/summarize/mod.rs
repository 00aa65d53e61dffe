//! Abstractive summarization via local providers.
//!
//! Summaries are optional; when no provider is configured the pipeline
//! leaves the summary fields null. The Ollama-backed client mirrors the
//! embedding adapter by issuing HTTP requests directly to the runtime.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::{SummaryProvider, get_config};

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Errors surfaced while attempting abstractive summarization.
#[derive(Debug, Error)]
pub enum SummarizationClientError {
    /// Provider was explicitly disabled or unreachable.
    #[error("Summarization provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate summary: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Request payload passed to the summarization provider.
#[derive(Debug, Clone)]
pub struct SummarizationRequest {
    /// Fully qualified model identifier understood by the provider.
    pub model: String,
    /// Prompt assembled by the pipeline.
    pub prompt: String,
}

/// Interface implemented by abstractive summarization providers.
#[async_trait]
pub trait SummarizationClient: Send + Sync {
    /// Generate a summary using the configured model.
    async fn generate_summary(
        &self,
        request: SummarizationRequest,
    ) -> Result<String, SummarizationClientError>;
}

/// Build a summarization client based on configuration.
pub fn get_summarization_client() -> Option<Box<dyn SummarizationClient>> {
    let config = get_config();
    match config.summary_provider {
        SummaryProvider::None => None,
        SummaryProvider::Ollama => {
            let base_url = config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
            Some(Box::new(OllamaSummarizationClient::new(base_url)))
        }
    }
}

struct OllamaSummarizationClient {
    http: Client,
    base_url: String,
}

impl OllamaSummarizationClient {
    fn new(base_url: String) -> Self {
        let http = Client::builder()
            .user_agent("taonga/summary")
            .build()
            .expect("Failed to construct reqwest::Client for summarization");
        Self { http, base_url }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl SummarizationClient for OllamaSummarizationClient {
    async fn generate_summary(
        &self,
        request: SummarizationRequest,
    ) -> Result<String, SummarizationClientError> {
        let payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                // Lower temperature for deterministic summaries.
                "temperature": 0.1,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                SummarizationClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SummarizationClientError::GenerationFailed(format!(
                "model {} is not installed",
                request.model
            )));
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizationClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|error| SummarizationClientError::InvalidResponse(error.to_string()))?;
        if !parsed.done {
            return Err(SummarizationClientError::InvalidResponse(
                "provider reported an incomplete generation".to_string(),
            ));
        }

        let summary = parsed.response.trim().to_string();
        if summary.is_empty() {
            return Err(SummarizationClientError::GenerationFailed(
                "provider returned an empty summary".to_string(),
            ));
        }
        Ok(summary)
    }
}
