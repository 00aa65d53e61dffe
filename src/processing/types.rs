//! Shared data model for pipeline runs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::ProtectionMetadata;
use crate::config::ExecutionMode;

/// Maximum characters retained from an error message on a terminal record.
pub const ERROR_MESSAGE_CAP: usize = 2000;

/// Terminal status of a pipeline run. Immutable once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The document completed the full pipeline.
    Ok,
    /// The document could not be processed and never will be.
    Unsupported,
    /// An unexpected failure stopped the run.
    Error,
}

/// Why a document was rejected as unprocessable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnsupportedReason {
    /// The filename extension maps to no known document type.
    UnknownType {
        /// Extension that failed classification.
        extension: String,
    },
    /// PDF text extraction produced no text.
    EmptyPdfText {
        /// Detail from the extraction attempt.
        detail: String,
    },
    /// Audio ingestion is not implemented.
    Audio,
}

impl std::fmt::Display for UnsupportedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownType { extension } => {
                write!(f, "unsupported document type: .{extension}")
            }
            Self::EmptyPdfText { detail } => {
                write!(f, "pdf text extraction produced no text: {detail}")
            }
            Self::Audio => write!(f, "audio ingestion is not supported"),
        }
    }
}

/// How extraction produced the text for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Local Tesseract subprocess.
    OfflineOcr,
    /// Remote vision-model OCR fallback.
    VisionOcr,
    /// Page-by-page PDF text extraction.
    PdfText,
    /// Plain text read straight from the bytes.
    TextFile,
    /// Markup stripped of tags, inline images OCR'd.
    Markup,
}

/// Extraction provenance recorded on a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionInfo {
    /// Which engine produced the text.
    pub method: ExtractionMethod,
    /// Engine-reported confidence in `[0.0, 1.0]`.
    pub confidence: f32,
}

/// Which backend holds a persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactBackend {
    /// Remote object store.
    Remote,
    /// Local filesystem under the storage root.
    Local,
}

/// A persisted raw or cleaned artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Backend-relative location of the stored object.
    pub location: String,
    /// Backend that accepted the write.
    pub backend: ArtifactBackend,
    /// Failure detail when a backend write was degraded or refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One embedded chunk of cleaned text, in document order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Stable chunk identifier, also used as the vector point id.
    pub id: Uuid,
    /// Chunk text.
    pub text: String,
    /// SHA-256 hex fingerprint of the chunk text.
    pub hash: String,
    /// Vector-store reference; null when embedding or upsert failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_ref: Option<String>,
    /// UTF-8 byte length of the chunk text.
    pub byte_length: usize,
}

/// Optional generated summaries attached to a completed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Short summary, three to six sentences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,
    /// Longer narrative summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long: Option<String>,
}

/// Identity of the submitted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDescriptor {
    /// Filename as submitted, used for type classification.
    pub filename: String,
    /// Size of the raw payload in bytes.
    pub byte_length: usize,
}

/// Full record of one document's trip through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run identifier.
    pub id: Uuid,
    /// Caller-supplied label for the submission source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
    /// Execution mode the run was performed under.
    pub mode: ExecutionMode,
    /// Identity of the submitted document.
    pub input_descriptor: InputDescriptor,
    /// Raw payload artifact, persisted before extraction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_artifact: Option<ArtifactRef>,
    /// Cleaned text artifact, present only for completed runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean_artifact: Option<ArtifactRef>,
    /// Embedded chunks in document order.
    pub chunks: Vec<ChunkRecord>,
    /// Vector-store batch id; null when no chunks were embedded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_batch: Option<Uuid>,
    /// Terminal status.
    pub status: RunStatus,
    /// Structured reason when the status is `unsupported`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsupported_reason: Option<UnsupportedReason>,
    /// Generated summaries, when requested and available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    /// Truncated failure message when the status is `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Protection records produced by the codec during this run.
    pub protection: Vec<ProtectionMetadata>,
    /// Extraction provenance, absent for unsupported documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionInfo>,
}

/// Truncate an error message to the terminal-record cap.
pub fn truncate_error(message: &str) -> String {
    if message.chars().count() <= ERROR_MESSAGE_CAP {
        return message.to_string();
    }
    message.chars().take(ERROR_MESSAGE_CAP).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_reason_mentions_extension() {
        let reason = UnsupportedReason::UnknownType {
            extension: "xyz".to_string(),
        };
        assert!(reason.to_string().contains(".xyz"));
    }

    #[test]
    fn error_messages_are_capped() {
        let long = "x".repeat(ERROR_MESSAGE_CAP + 50);
        assert_eq!(truncate_error(&long).chars().count(), ERROR_MESSAGE_CAP);
        assert_eq!(truncate_error("short"), "short");
    }

    #[test]
    fn run_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Unsupported).unwrap(),
            "\"unsupported\""
        );
    }
}
