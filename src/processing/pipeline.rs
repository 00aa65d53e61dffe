//! Pipeline orchestrator.
//!
//! Walks one document through the fixed state machine: start, extracting,
//! cleaning/chunking, embedding/persisting, then a terminal status. The
//! orchestrator performs no retries of its own; collaborator failures either
//! degrade (recorded per chunk) or terminate the run with `error`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::codec::CulturalCodec;
use crate::config::ExecutionMode;
use crate::extract::{ExtractError, Extractor, classify};
use crate::processing::chunking::chunk_text;
use crate::processing::embed_store::PersistenceCoordinator;
use crate::processing::normalize::normalize_whitespace;
use crate::processing::types::{
    InputDescriptor, PipelineRun, RunStatus, truncate_error,
};

/// Milestone sink and cancellation probe injected into each run.
///
/// Cancellation is cooperative: the orchestrator consults the probe at one
/// checkpoint, immediately before the embedding/persistence stage.
#[async_trait]
pub trait RunObserver: Send + Sync {
    /// Report a stage transition with a rough completion percentage.
    async fn on_progress(&self, stage: &str, percent: u8);
    /// Whether the caller has requested cancellation.
    async fn is_cancelled(&self) -> bool;
}

/// Observer that ignores progress and never cancels.
pub struct NoopObserver;

#[async_trait]
impl RunObserver for NoopObserver {
    async fn on_progress(&self, _stage: &str, _percent: u8) {}
    async fn is_cancelled(&self) -> bool {
        false
    }
}

/// A document submission.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Filename used for type classification.
    pub filename: String,
    /// Raw document bytes.
    pub bytes: Vec<u8>,
    /// Caller-supplied label for the submission source.
    pub source_tag: Option<String>,
    /// Whether to request summaries from the configured provider.
    pub generate_summary: bool,
}

/// How a run ended.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The run reached a terminal status and produced a full record.
    Completed(Box<PipelineRun>),
    /// The run stopped at the cancellation checkpoint; nothing was embedded.
    Cancelled {
        /// Identifier the run would have carried.
        run_id: Uuid,
    },
}

/// The document pipeline with all collaborators injected.
pub struct Pipeline {
    extractor: Extractor,
    codec: CulturalCodec,
    coordinator: PersistenceCoordinator,
    chunk_char_budget: usize,
    mode: ExecutionMode,
}

impl Pipeline {
    /// Assemble a pipeline from its collaborators.
    pub fn new(
        extractor: Extractor,
        codec: CulturalCodec,
        coordinator: PersistenceCoordinator,
        chunk_char_budget: usize,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            extractor,
            codec,
            coordinator,
            chunk_char_budget,
            mode,
        }
    }

    /// Run one document through the full pipeline.
    pub async fn run(&self, request: IngestRequest, observer: &dyn RunObserver) -> PipelineOutcome {
        let run_id = Uuid::new_v4();
        let input = classify(&request.filename);
        tracing::info!(
            %run_id,
            filename = %request.filename,
            bytes = request.bytes.len(),
            input = ?input,
            "starting pipeline run"
        );
        observer.on_progress("start", 0).await;

        let mut run = PipelineRun {
            id: run_id,
            source_tag: request.source_tag.clone(),
            mode: self.mode,
            input_descriptor: InputDescriptor {
                filename: request.filename.clone(),
                byte_length: request.bytes.len(),
            },
            raw_artifact: None,
            clean_artifact: None,
            chunks: Vec::new(),
            vector_batch: None,
            status: RunStatus::Ok,
            unsupported_reason: None,
            summary: None,
            error: None,
            protection: Vec::new(),
            extraction: None,
        };

        // Raw bytes are persisted before extraction so even rejected
        // documents leave an artifact behind; a failed write is recorded on
        // the reference.
        run.raw_artifact = Some(self.coordinator.store_raw(run_id, &request.bytes).await);

        observer.on_progress("extracting", 10).await;
        let extraction = match self.extractor.extract(&input, &request.bytes).await {
            Ok(extraction) => extraction,
            Err(ExtractError::Unsupported(reason)) => {
                tracing::info!(%run_id, %reason, "document is unsupported");
                run.status = RunStatus::Unsupported;
                run.unsupported_reason = Some(reason);
                observer.on_progress("finished", 100).await;
                return PipelineOutcome::Completed(Box::new(run));
            }
        };
        run.extraction = Some(extraction.info);

        let protected = self.codec.protect(&extraction.text);
        if let Some(metadata) = &protected.metadata {
            tracing::info!(%run_id, signature = %metadata.signature, "protection applied");
            run.protection.push(metadata.clone());
        }

        observer.on_progress("cleaning", 40).await;
        let clean_text = normalize_whitespace(&protected.text);
        let chunk_texts = chunk_text(&clean_text, self.chunk_char_budget);
        tracing::debug!(%run_id, chunks = chunk_texts.len(), "chunked clean text");

        // Single cancellation checkpoint, before anything is embedded.
        if observer.is_cancelled().await {
            tracing::info!(%run_id, "run cancelled before embedding");
            return PipelineOutcome::Cancelled { run_id };
        }

        observer.on_progress("embedding", 70).await;
        match self
            .coordinator
            .embed_and_store(
                run_id,
                request.source_tag.as_deref(),
                &clean_text,
                chunk_texts,
                request.generate_summary,
            )
            .await
        {
            Ok(batch) => {
                run.chunks = batch.chunks;
                run.vector_batch = batch.batch_id;
                run.clean_artifact = Some(batch.clean_artifact);
                run.summary = batch.summary;
            }
            Err(error) => {
                tracing::error!(%run_id, %error, "persistence failed");
                run.status = RunStatus::Error;
                run.error = Some(truncate_error(&error.to_string()));
            }
        }

        observer.on_progress("finished", 100).await;
        tracing::info!(%run_id, status = ?run.status, chunks = run.chunks.len(), "pipeline run finished");
        PipelineOutcome::Completed(Box::new(run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingClient, EmbeddingClientError};
    use crate::extract::ocr::OcrChain;
    use crate::processing::types::UnsupportedReason;
    use crate::storage::{ArtifactStore, LocalObjectStore, ObjectStore};
    use crate::vector_store::{ChunkPoint, VectorStore, VectorStoreError};
    use std::path::PathBuf;

    struct StubEmbedding;

    #[async_trait]
    impl EmbeddingClient for StubEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
            Ok(vec![0.5, 0.5])
        }
    }

    struct StubStore;

    #[async_trait]
    impl VectorStore for StubStore {
        async fn upsert(&self, point: ChunkPoint) -> Result<String, VectorStoreError> {
            Ok(format!("test/{}", point.id))
        }
    }

    struct CancellingObserver;

    #[async_trait]
    impl RunObserver for CancellingObserver {
        async fn on_progress(&self, _stage: &str, _percent: u8) {}
        async fn is_cancelled(&self) -> bool {
            true
        }
    }

    fn pipeline(tag: &str) -> (Pipeline, PathBuf) {
        let root = std::env::temp_dir().join(format!("taonga-pipeline-{tag}-{}", Uuid::new_v4()));
        let local: Box<dyn ObjectStore> = Box::new(LocalObjectStore::new(root.clone()));
        let coordinator = PersistenceCoordinator::new(
            Box::new(StubEmbedding),
            Box::new(StubStore),
            ArtifactStore::new(None, local),
            None,
            "m".to_string(),
        );
        let extractor = Extractor::new(OcrChain::new(None, None), 10, 5);
        (
            Pipeline::new(
                extractor,
                CulturalCodec::new(),
                coordinator,
                800,
                ExecutionMode::Embedded,
            ),
            root,
        )
    }

    fn request(filename: &str, bytes: &[u8]) -> IngestRequest {
        IngestRequest {
            filename: filename.to_string(),
            bytes: bytes.to_vec(),
            source_tag: None,
            generate_summary: false,
        }
    }

    #[tokio::test]
    async fn one_page_text_completes_with_one_chunk() {
        let (pipeline, root) = pipeline("text");
        let outcome = pipeline
            .run(request("greeting.txt", "Kia ora,\n\nwelcome!".as_bytes()), &NoopObserver)
            .await;

        let PipelineOutcome::Completed(run) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(run.status, RunStatus::Ok);
        assert_eq!(run.chunks.len(), 1);
        assert_eq!(run.chunks[0].text, "Kia ora, welcome!");
        assert!(run.vector_batch.is_some());
        assert!(run.raw_artifact.is_some());
        assert!(run.clean_artifact.is_some());
        tokio::fs::remove_dir_all(root).await.ok();
    }

    #[tokio::test]
    async fn audio_is_unsupported_without_clean_artifact() {
        let (pipeline, root) = pipeline("audio");
        let outcome = pipeline
            .run(request("waiata.mp3", b"id3 bytes"), &NoopObserver)
            .await;

        let PipelineOutcome::Completed(run) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(run.status, RunStatus::Unsupported);
        assert_eq!(run.unsupported_reason, Some(UnsupportedReason::Audio));
        assert!(run.clean_artifact.is_none());
        assert!(run.chunks.is_empty());
        assert!(run.raw_artifact.is_some());
        tokio::fs::remove_dir_all(root).await.ok();
    }

    #[tokio::test]
    async fn empty_pdf_is_unsupported_with_raw_artifact() {
        let (pipeline, root) = pipeline("pdf");
        let outcome = pipeline.run(request("blank.pdf", &[]), &NoopObserver).await;

        let PipelineOutcome::Completed(run) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(run.status, RunStatus::Unsupported);
        let reason = run.unsupported_reason.expect("reason present");
        assert!(reason.to_string().contains("extraction"));
        assert!(run.raw_artifact.is_some());
        tokio::fs::remove_dir_all(root).await.ok();
    }

    #[tokio::test]
    async fn cancellation_checkpoint_stops_before_embedding() {
        let (pipeline, root) = pipeline("cancel");
        let outcome = pipeline
            .run(request("doc.txt", b"some words here"), &CancellingObserver)
            .await;
        assert!(matches!(outcome, PipelineOutcome::Cancelled { .. }));
        tokio::fs::remove_dir_all(root).await.ok();
    }

    #[tokio::test]
    async fn protected_text_carries_codec_metadata() {
        let (pipeline, root) = pipeline("codec");
        let outcome = pipeline
            .run(request("karakia.txt", "he taonga te reo māori".as_bytes()), &NoopObserver)
            .await;

        let PipelineOutcome::Completed(run) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(run.protection.len(), 1);
        assert!(run.protection[0].signature.starts_with("k9_"));
        tokio::fs::remove_dir_all(root).await.ok();
    }
}
