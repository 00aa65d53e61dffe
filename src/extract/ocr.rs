//! OCR engines for image text recognition.
//!
//! The offline engine shells out to a Tesseract binary over stdin/stdout with
//! the `eng+mri` language pack. The vision client posts the image to a remote
//! OCR service. The chain tries the offline engine first and falls back to
//! the vision client when the offline pass is unavailable, fails, or returns
//! empty text; each engine runs at most once per image.

use std::process::Stdio;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::processing::types::ExtractionMethod;

/// Errors surfaced by an OCR engine.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine cannot run in this environment.
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),
    /// The engine ran but recognition failed.
    #[error("OCR recognition failed: {0}")]
    Failed(String),
    /// The engine returned a response that could not be parsed.
    #[error("Malformed OCR response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by image text recognizers.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize text in the given image bytes.
    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// Offline OCR via a Tesseract subprocess.
pub struct TesseractEngine {
    binary: String,
}

impl TesseractEngine {
    /// Create an engine using the given binary path or name.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check that the binary exists and answers `--version`.
    pub async fn probe(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", "eng+mri"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| OcrError::Unavailable(format!("failed to spawn tesseract: {error}")))?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(image)
                .await
                .map_err(|error| OcrError::Failed(format!("failed to feed image: {error}")))?;
        }
        drop(child.stdin.take());

        let output = child
            .wait_with_output()
            .await
            .map_err(|error| OcrError::Failed(format!("tesseract did not complete: {error}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Remote vision-model OCR fallback.
pub struct VisionOcrClient {
    http: Client,
    base_url: String,
}

impl VisionOcrClient {
    /// Create a client for the given service base URL.
    pub fn new(base_url: String) -> Self {
        let http = Client::builder()
            .user_agent("taonga/ocr")
            .build()
            .expect("Failed to construct reqwest::Client for OCR");
        Self { http, base_url }
    }

    fn endpoint(&self) -> String {
        format!("{}/ocr", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct VisionOcrResponse {
    text: String,
}

#[async_trait]
impl OcrEngine for VisionOcrClient {
    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError> {
        let payload = json!({
            "image_base64": BASE64.encode(image),
            "languages": ["eng", "mri"],
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                OcrError::Unavailable(format!(
                    "failed to reach OCR service at {}: {error}",
                    self.base_url
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Failed(format!(
                "OCR service returned {status}: {body}"
            )));
        }

        let parsed: VisionOcrResponse = response
            .json()
            .await
            .map_err(|error| OcrError::InvalidResponse(error.to_string()))?;
        Ok(parsed.text.trim().to_string())
    }
}

/// Text recognized by the chain, with provenance and confidence.
#[derive(Debug, Clone)]
pub struct OcrResult {
    /// Recognized text, or inline error text when every engine failed.
    pub text: String,
    /// Engine that produced the text.
    pub method: ExtractionMethod,
    /// Recognition confidence; zero when every engine failed.
    pub confidence: f32,
}

/// Offline-first OCR chain with a remote fallback.
pub struct OcrChain {
    offline: Option<Box<dyn OcrEngine>>,
    vision: Option<Box<dyn OcrEngine>>,
}

impl OcrChain {
    /// Assemble a chain from the available engines.
    pub fn new(offline: Option<Box<dyn OcrEngine>>, vision: Option<Box<dyn OcrEngine>>) -> Self {
        Self { offline, vision }
    }

    /// Recognize text, trying each engine at most once.
    ///
    /// Engine failures never propagate; when both engines fail or produce
    /// empty text the result carries inline `[ocr error]` text so the rest of
    /// the pipeline still runs.
    pub async fn recognize(&self, image: &[u8]) -> OcrResult {
        let mut last_error: Option<OcrError> = None;

        if let Some(engine) = &self.offline {
            match engine.extract_text(image).await {
                Ok(text) if !text.is_empty() => {
                    return OcrResult {
                        text,
                        method: ExtractionMethod::OfflineOcr,
                        confidence: 0.9,
                    };
                }
                Ok(_) => {
                    tracing::debug!("offline OCR returned empty text, trying fallback");
                }
                Err(error) => {
                    tracing::warn!(%error, "offline OCR failed, trying fallback");
                    last_error = Some(error);
                }
            }
        }

        if let Some(engine) = &self.vision {
            match engine.extract_text(image).await {
                Ok(text) if !text.is_empty() => {
                    return OcrResult {
                        text,
                        method: ExtractionMethod::VisionOcr,
                        confidence: 0.7,
                    };
                }
                Ok(_) => {
                    tracing::debug!("vision OCR returned empty text");
                }
                Err(error) => {
                    tracing::warn!(%error, "vision OCR failed");
                    last_error = Some(error);
                }
            }
        }

        let detail = match last_error {
            Some(error) => error.to_string(),
            None => "no OCR engine produced text".to_string(),
        };
        OcrResult {
            text: format!("[ocr error] {detail}"),
            method: ExtractionMethod::OfflineOcr,
            confidence: 0.0,
        }
    }
}
