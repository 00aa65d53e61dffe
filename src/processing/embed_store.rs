//! Embedding and persistence coordination for cleaned chunks.
//!
//! For each chunk, in document order: embed, fingerprint, vector-store
//! upsert tagged with the run's batch id, and a local content write. Chunk
//! level failures are recorded on the chunk (`embedding_ref` stays null) and
//! never abort the run; only the clean-artifact write is structural.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::embedding::EmbeddingClient;
use crate::processing::types::{ArtifactBackend, ArtifactRef, ChunkRecord, RunSummary, truncate_error};
use crate::storage::{ArtifactStore, StorageError};
use crate::summarize::{SummarizationClient, SummarizationRequest};
use crate::vector_store::{ChunkPoint, VectorStore};

/// Everything the coordinator persisted for one run.
#[derive(Debug)]
pub struct StoredBatch {
    /// Chunk records in document order.
    pub chunks: Vec<ChunkRecord>,
    /// Batch id; null when no chunk reached the vector store.
    pub batch_id: Option<Uuid>,
    /// Cleaned text artifact.
    pub clean_artifact: ArtifactRef,
    /// Generated summaries, when requested and available.
    pub summary: Option<RunSummary>,
}

/// Coordinates embedding, vector upserts, and artifact persistence.
pub struct PersistenceCoordinator {
    embedding: Box<dyn EmbeddingClient>,
    vector_store: Box<dyn VectorStore>,
    artifacts: ArtifactStore,
    summarizer: Option<Box<dyn SummarizationClient>>,
    summary_model: String,
}

impl PersistenceCoordinator {
    /// Assemble a coordinator from its collaborators.
    pub fn new(
        embedding: Box<dyn EmbeddingClient>,
        vector_store: Box<dyn VectorStore>,
        artifacts: ArtifactStore,
        summarizer: Option<Box<dyn SummarizationClient>>,
        summary_model: String,
    ) -> Self {
        Self {
            embedding,
            vector_store,
            artifacts,
            summarizer,
            summary_model,
        }
    }

    /// Persist the raw payload for a run, base64-encoded.
    ///
    /// A failed write never stops the run; the failure is recorded on the
    /// returned reference instead.
    pub async fn store_raw(&self, run_id: Uuid, bytes: &[u8]) -> ArtifactRef {
        use base64::Engine as _;
        let location = format!("runs/{run_id}/raw.b64");
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        match self.artifacts.store(&location, encoded.as_bytes()).await {
            Ok(artifact) => artifact,
            Err(error) => {
                tracing::warn!(%run_id, %error, "raw artifact write failed");
                ArtifactRef {
                    location,
                    backend: ArtifactBackend::Local,
                    error: Some(truncate_error(&error.to_string())),
                }
            }
        }
    }

    /// Embed and persist the cleaned text and its chunks.
    ///
    /// The clean-artifact write is the only fatal failure here; everything
    /// else degrades to per-chunk records and log lines.
    pub async fn embed_and_store(
        &self,
        run_id: Uuid,
        source_tag: Option<&str>,
        clean_text: &str,
        chunk_texts: Vec<String>,
        generate_summary: bool,
    ) -> Result<StoredBatch, StorageError> {
        let clean_artifact = self
            .artifacts
            .store(&format!("runs/{run_id}/clean.txt"), clean_text.as_bytes())
            .await?;

        let batch_candidate = Uuid::new_v4();
        let mut embedded_any = false;
        let mut chunks = Vec::with_capacity(chunk_texts.len());

        for (position, text) in chunk_texts.into_iter().enumerate() {
            let id = Uuid::new_v4();
            let hash = sha256_hex(&text);
            let byte_length = text.len();

            let embedding_ref = match self.embedding.embed(&text).await {
                Ok(vector) => {
                    let point = ChunkPoint {
                        id,
                        vector,
                        text: text.clone(),
                        hash: hash.clone(),
                        batch_id: batch_candidate,
                        run_id,
                        source_tag: source_tag.map(str::to_string),
                    };
                    match self.vector_store.upsert(point).await {
                        Ok(reference) => {
                            embedded_any = true;
                            Some(reference)
                        }
                        Err(error) => {
                            tracing::warn!(%run_id, position, %error, "vector upsert failed for chunk");
                            None
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(%run_id, position, %error, "embedding failed for chunk");
                    None
                }
            };

            if let Err(error) = self
                .artifacts
                .store(&format!("runs/{run_id}/chunks/{position}.txt"), text.as_bytes())
                .await
            {
                tracing::warn!(%run_id, position, %error, "chunk content write failed");
            }

            chunks.push(ChunkRecord {
                id,
                text,
                hash,
                embedding_ref,
                byte_length,
            });
        }

        let batch_id = embedded_any.then_some(batch_candidate);
        let summary = if generate_summary {
            self.generate_summaries(clean_text).await
        } else {
            None
        };

        self.write_run_metadata(run_id, &chunks, batch_id).await;

        Ok(StoredBatch {
            chunks,
            batch_id,
            clean_artifact,
            summary,
        })
    }

    /// Generate short and long summaries, swallowing provider failures.
    async fn generate_summaries(&self, clean_text: &str) -> Option<RunSummary> {
        let summarizer = self.summarizer.as_ref()?;
        let mut summary = RunSummary::default();

        let short_prompt = format!(
            "Summarize the following document in 3 to 6 sentences:\n\n{clean_text}"
        );
        match summarizer
            .generate_summary(SummarizationRequest {
                model: self.summary_model.clone(),
                prompt: short_prompt,
            })
            .await
        {
            Ok(text) => summary.short = Some(text),
            Err(error) => tracing::warn!(%error, "short summary generation failed"),
        }

        let long_prompt = format!(
            "Write a detailed narrative summary of the following document, \
             covering every major topic it touches:\n\n{clean_text}"
        );
        match summarizer
            .generate_summary(SummarizationRequest {
                model: self.summary_model.clone(),
                prompt: long_prompt,
            })
            .await
        {
            Ok(text) => summary.long = Some(text),
            Err(error) => tracing::warn!(%error, "long summary generation failed"),
        }

        if summary.short.is_none() && summary.long.is_none() {
            None
        } else {
            Some(summary)
        }
    }

    /// Best-effort JSON record describing what the run stored.
    async fn write_run_metadata(
        &self,
        run_id: Uuid,
        chunks: &[ChunkRecord],
        batch_id: Option<Uuid>,
    ) {
        let record = serde_json::json!({
            "run_id": run_id.to_string(),
            "chunk_count": chunks.len(),
            "embedded_count": chunks.iter().filter(|c| c.embedding_ref.is_some()).count(),
            "batch_id": batch_id.map(|id| id.to_string()),
        });
        let bytes = record.to_string().into_bytes();
        if let Err(error) = self
            .artifacts
            .store(&format!("runs/{run_id}/run.json"), &bytes)
            .await
        {
            tracing::warn!(%run_id, %error, "run metadata write failed");
        }
    }
}

/// SHA-256 hex fingerprint of a chunk's text.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingClientError;
    use crate::storage::{LocalObjectStore, ObjectStore};
    use crate::vector_store::VectorStoreError;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct StubEmbedding {
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingClient for StubEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
            if self.fail {
                Err(EmbeddingClientError::GenerationFailed("stub".to_string()))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }
    }

    struct RecordingStore;

    #[async_trait]
    impl VectorStore for RecordingStore {
        async fn upsert(&self, point: ChunkPoint) -> Result<String, VectorStoreError> {
            Ok(format!("test/{}", point.id))
        }
    }

    fn temp_artifacts(tag: &str) -> (ArtifactStore, PathBuf) {
        let root = std::env::temp_dir().join(format!("taonga-embed-{tag}-{}", Uuid::new_v4()));
        let local: Box<dyn ObjectStore> = Box::new(LocalObjectStore::new(root.clone()));
        (ArtifactStore::new(None, local), root)
    }

    #[tokio::test]
    async fn chunks_share_one_batch_and_keep_order() {
        let (artifacts, root) = temp_artifacts("batch");
        let coordinator = PersistenceCoordinator::new(
            Box::new(StubEmbedding { fail: false }),
            Box::new(RecordingStore),
            artifacts,
            None,
            "m".to_string(),
        );

        let run_id = Uuid::new_v4();
        let batch = coordinator
            .embed_and_store(
                run_id,
                None,
                "alpha beta",
                vec!["alpha".to_string(), "beta".to_string()],
                false,
            )
            .await
            .unwrap();

        assert!(batch.batch_id.is_some());
        assert_eq!(batch.chunks.len(), 2);
        assert_eq!(batch.chunks[0].text, "alpha");
        assert_eq!(batch.chunks[1].text, "beta");
        assert!(batch.chunks.iter().all(|c| c.embedding_ref.is_some()));
        assert_eq!(batch.chunks[0].hash, sha256_hex("alpha"));
        tokio::fs::remove_dir_all(root).await.ok();
    }

    #[tokio::test]
    async fn embedding_failure_leaves_null_ref_and_null_batch() {
        let (artifacts, root) = temp_artifacts("fail");
        let coordinator = PersistenceCoordinator::new(
            Box::new(StubEmbedding { fail: true }),
            Box::new(RecordingStore),
            artifacts,
            None,
            "m".to_string(),
        );

        let batch = coordinator
            .embed_and_store(
                Uuid::new_v4(),
                None,
                "alpha",
                vec!["alpha".to_string()],
                false,
            )
            .await
            .unwrap();

        assert!(batch.batch_id.is_none());
        assert!(batch.chunks[0].embedding_ref.is_none());
        tokio::fs::remove_dir_all(root).await.ok();
    }

    #[tokio::test]
    async fn raw_write_failure_is_recorded_on_the_artifact() {
        // A plain file where the storage root should be makes every local
        // write fail.
        let root = std::env::temp_dir().join(format!("taonga-embed-rawfail-{}", Uuid::new_v4()));
        tokio::fs::write(&root, b"not a directory").await.unwrap();
        let local: Box<dyn ObjectStore> = Box::new(LocalObjectStore::new(root.clone()));
        let coordinator = PersistenceCoordinator::new(
            Box::new(StubEmbedding { fail: false }),
            Box::new(RecordingStore),
            ArtifactStore::new(None, local),
            None,
            "m".to_string(),
        );

        let artifact = coordinator.store_raw(Uuid::new_v4(), b"payload").await;
        assert!(artifact.location.ends_with("raw.b64"));
        assert!(artifact.error.is_some());
        tokio::fs::remove_file(root).await.ok();
    }

    #[tokio::test]
    async fn empty_chunk_list_yields_no_batch() {
        let (artifacts, root) = temp_artifacts("empty");
        let coordinator = PersistenceCoordinator::new(
            Box::new(StubEmbedding { fail: false }),
            Box::new(RecordingStore),
            artifacts,
            None,
            "m".to_string(),
        );

        let batch = coordinator
            .embed_and_store(Uuid::new_v4(), None, "", Vec::new(), false)
            .await
            .unwrap();
        assert!(batch.batch_id.is_none());
        assert!(batch.chunks.is_empty());
        tokio::fs::remove_dir_all(root).await.ok();
    }
}
