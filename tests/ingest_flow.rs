//! End-to-end flows over the scheduler with stub collaborators.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use taonga::codec::CulturalCodec;
use taonga::config::{ExecutionMode, LaneOverrides};
use taonga::embedding::{EmbeddingClient, EmbeddingClientError};
use taonga::extract::Extractor;
use taonga::extract::ocr::OcrChain;
use taonga::jobs::broker::{InProcessBroker, QueueBroker};
use taonga::jobs::scheduler::EnqueueRequest;
use taonga::jobs::store::{InMemoryJobStore, JobPatch, JobStore, JobStoreError};
use taonga::jobs::types::{Job, JobFilter};
use taonga::jobs::worker::Worker;
use taonga::jobs::{JobScheduler, JobStatus, Lane, PipelineContext, SchedulerApi};
use taonga::metrics::PipelineMetrics;
use taonga::processing::embed_store::PersistenceCoordinator;
use taonga::processing::pipeline::IngestRequest;
use taonga::processing::types::RunStatus;
use taonga::processing::Pipeline;
use taonga::storage::{ArtifactStore, LocalObjectStore, ObjectStore};
use taonga::vector_store::{ChunkPoint, VectorStore, VectorStoreError};

struct StubEmbedding;

#[async_trait]
impl EmbeddingClient for StubEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        Ok(vec![0.25, 0.75])
    }
}

#[derive(Default)]
struct CountingVectorStore {
    upserts: AtomicUsize,
}

#[async_trait]
impl VectorStore for CountingVectorStore {
    async fn upsert(&self, point: ChunkPoint) -> Result<String, VectorStoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(format!("chunks/{}", point.id))
    }
}

struct Harness {
    scheduler: JobScheduler,
    vector_store: Arc<CountingVectorStore>,
    jobs: Arc<InMemoryJobStore>,
    broker: Arc<InProcessBroker>,
    metrics: Arc<PipelineMetrics>,
    storage_root: PathBuf,
}

fn build_context(
    mode: ExecutionMode,
    max_retries: u32,
    jobs: Arc<dyn JobStore>,
    broker: Arc<InProcessBroker>,
    metrics: Arc<PipelineMetrics>,
    vector_store: Arc<CountingVectorStore>,
    storage_root: PathBuf,
) -> Arc<PipelineContext> {
    let local: Box<dyn ObjectStore> = Box::new(LocalObjectStore::new(storage_root.clone()));
    let coordinator = PersistenceCoordinator::new(
        Box::new(StubEmbedding),
        Box::new(SharedVectorStore(vector_store)),
        ArtifactStore::new(None, local),
        None,
        "test-model".to_string(),
    );
    let pipeline = Pipeline::new(
        Extractor::new(OcrChain::new(None, None), 10, 5),
        CulturalCodec::new(),
        coordinator,
        800,
        mode,
    );

    Arc::new(PipelineContext {
        pipeline,
        jobs,
        broker,
        metrics,
        mode,
        max_retries,
        storage_root,
        lane_timeouts: LaneOverrides::default(),
        lane_retentions: LaneOverrides::default(),
    })
}

fn harness(mode: ExecutionMode, max_retries: u32, tag: &str) -> Harness {
    let storage_root = std::env::temp_dir().join(format!("taonga-it-{tag}-{}", Uuid::new_v4()));
    let vector_store = Arc::new(CountingVectorStore::default());
    let jobs = Arc::new(InMemoryJobStore::new());
    let broker = Arc::new(InProcessBroker::new());
    let metrics = Arc::new(PipelineMetrics::new());

    let ctx = build_context(
        mode,
        max_retries,
        jobs.clone(),
        broker.clone(),
        metrics.clone(),
        vector_store.clone(),
        storage_root.clone(),
    );

    Harness {
        scheduler: JobScheduler::new(ctx),
        vector_store,
        jobs,
        broker,
        metrics,
        storage_root,
    }
}

struct SharedVectorStore(Arc<CountingVectorStore>);

#[async_trait]
impl VectorStore for SharedVectorStore {
    async fn upsert(&self, point: ChunkPoint) -> Result<String, VectorStoreError> {
        self.0.upsert(point).await
    }
}

fn ingest_request(filename: &str, bytes: &[u8]) -> IngestRequest {
    IngestRequest {
        filename: filename.to_string(),
        bytes: bytes.to_vec(),
        source_tag: Some("integration".to_string()),
        generate_summary: false,
    }
}

#[tokio::test]
async fn embedded_kia_ora_run_embeds_one_chunk() {
    let h = harness(ExecutionMode::Embedded, 3, "kia-ora");

    let run = h
        .scheduler
        .ingest(ingest_request("mihi.txt", "Kia ora,\n\nnau mai!".as_bytes()))
        .await;

    assert_eq!(run.status, RunStatus::Ok);
    assert_eq!(run.chunks.len(), 1);
    assert_eq!(run.chunks[0].text, "Kia ora, nau mai!");
    assert!(run.chunks[0].embedding_ref.is_some());
    assert!(run.vector_batch.is_some());
    assert_eq!(h.vector_store.upserts.load(Ordering::SeqCst), 1);

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.documents_ingested, 1);
    assert_eq!(snapshot.chunks_embedded, 1);

    tokio::fs::remove_dir_all(h.storage_root).await.ok();
}

#[tokio::test]
async fn audio_is_rejected_without_embedding_anything() {
    let h = harness(ExecutionMode::Embedded, 3, "audio");

    let run = h
        .scheduler
        .ingest(ingest_request("waiata.mp3", b"id3 bytes"))
        .await;

    assert_eq!(run.status, RunStatus::Unsupported);
    assert!(run.clean_artifact.is_none());
    assert!(run.raw_artifact.is_some());
    assert_eq!(h.vector_store.upserts.load(Ordering::SeqCst), 0);

    tokio::fs::remove_dir_all(h.storage_root).await.ok();
}

#[tokio::test]
async fn empty_pdf_keeps_the_raw_artifact() {
    let h = harness(ExecutionMode::Embedded, 3, "pdf");

    let run = h.scheduler.ingest(ingest_request("blank.pdf", &[])).await;

    assert_eq!(run.status, RunStatus::Unsupported);
    let reason = run.unsupported_reason.expect("reason present");
    assert!(reason.to_string().contains("extraction"));
    let raw = run.raw_artifact.expect("raw artifact persisted");
    assert!(h.storage_root.join(&raw.location).exists());

    tokio::fs::remove_dir_all(h.storage_root).await.ok();
}

#[tokio::test]
async fn embedded_enqueue_returns_the_terminal_result_inline() {
    let h = harness(ExecutionMode::Embedded, 3, "enqueue");

    tokio::fs::create_dir_all(h.storage_root.join("inbox"))
        .await
        .unwrap();
    tokio::fs::write(h.storage_root.join("inbox/doc.txt"), b"he whakapapa korero")
        .await
        .unwrap();

    let response = h
        .scheduler
        .enqueue(EnqueueRequest {
            payload_ref: "inbox/doc.txt".to_string(),
            realm: Some("awa".to_string()),
            page_estimate: None,
        })
        .await
        .unwrap();

    assert_eq!(response.lane, Lane::Default);
    assert_eq!(response.status, JobStatus::Finished);
    let result = response.result.expect("terminal result inline");
    assert_eq!(result["status"], "ok");

    let job = h.scheduler.job(response.job_id).await.unwrap();
    assert!(job.duration_secs.is_some());
    assert!(job.finished_at.is_some());

    tokio::fs::remove_dir_all(h.storage_root).await.ok();
}

#[tokio::test]
async fn distributed_enqueue_parks_the_job_on_a_lane() {
    let h = harness(ExecutionMode::Distributed, 3, "queue");

    tokio::fs::create_dir_all(&h.storage_root).await.unwrap();
    tokio::fs::write(h.storage_root.join("doc.txt"), b"short note")
        .await
        .unwrap();

    let response = h
        .scheduler
        .enqueue(EnqueueRequest {
            payload_ref: "doc.txt".to_string(),
            realm: None,
            page_estimate: Some(2),
        })
        .await
        .unwrap();
    assert_eq!(response.lane, Lane::Urgent);
    assert_eq!(response.status, JobStatus::Queued);
    assert_eq!(h.broker.backlog(Lane::Urgent).await.unwrap(), 1);

    let worker = Worker::new(
        JobScheduler::new(h.scheduler.context()),
        vec![Lane::Urgent, Lane::Default, Lane::Slow],
    );
    assert!(worker.poll_once().await.unwrap());

    let job = h.scheduler.job(response.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Finished);
    assert_eq!(h.vector_store.upserts.load(Ordering::SeqCst), 1);

    tokio::fs::remove_dir_all(h.storage_root).await.ok();
}

#[tokio::test]
async fn cancelled_job_is_skipped_with_zero_chunks_embedded() {
    let h = harness(ExecutionMode::Distributed, 3, "cancel");

    tokio::fs::create_dir_all(&h.storage_root).await.unwrap();
    tokio::fs::write(h.storage_root.join("doc.txt"), b"to be cancelled")
        .await
        .unwrap();

    let response = h
        .scheduler
        .enqueue(EnqueueRequest {
            payload_ref: "doc.txt".to_string(),
            realm: None,
            page_estimate: None,
        })
        .await
        .unwrap();

    let cancelled = h.scheduler.cancel(response.job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    // the envelope is still on the lane; the worker must skip it
    let worker = Worker::new(JobScheduler::new(h.scheduler.context()), vec![Lane::Default]);
    assert!(worker.poll_once().await.unwrap());

    let job = h.scheduler.job(response.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(h.vector_store.upserts.load(Ordering::SeqCst), 0);

    // terminal states are sinks; a second cancel changes nothing
    let again = h.scheduler.cancel(response.job_id).await.unwrap();
    assert_eq!(again.status, JobStatus::Cancelled);

    tokio::fs::remove_dir_all(h.storage_root).await.ok();
}

#[tokio::test]
async fn separate_worker_context_coordinates_through_the_shared_store() {
    // server and worker live in different processes in distributed mode;
    // they agree on job state only through the shared store and broker
    let storage_root = std::env::temp_dir().join(format!("taonga-it-shared-{}", Uuid::new_v4()));
    let vector_store = Arc::new(CountingVectorStore::default());
    let jobs: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let broker = Arc::new(InProcessBroker::new());
    let metrics = Arc::new(PipelineMetrics::new());

    let server = JobScheduler::new(build_context(
        ExecutionMode::Distributed,
        3,
        jobs.clone(),
        broker.clone(),
        metrics.clone(),
        vector_store.clone(),
        storage_root.clone(),
    ));
    let worker_ctx = build_context(
        ExecutionMode::Distributed,
        3,
        jobs.clone(),
        broker.clone(),
        metrics,
        vector_store.clone(),
        storage_root.clone(),
    );

    tokio::fs::create_dir_all(&storage_root).await.unwrap();
    tokio::fs::write(storage_root.join("doc.txt"), b"he kupu ruarua nei")
        .await
        .unwrap();

    let response = server
        .enqueue(EnqueueRequest {
            payload_ref: "doc.txt".to_string(),
            realm: None,
            page_estimate: None,
        })
        .await
        .unwrap();
    assert_eq!(response.status, JobStatus::Queued);

    let worker = Worker::new(JobScheduler::new(worker_ctx), vec![Lane::Default]);
    assert!(worker.poll_once().await.unwrap());

    // the server sees the transition the worker made
    let job = server.job(response.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Finished);
    assert_eq!(vector_store.upserts.load(Ordering::SeqCst), 1);

    tokio::fs::remove_dir_all(storage_root).await.ok();
}

/// Store that requests cancellation when the embedding stage is reported,
/// which is strictly after the run's cancellation checkpoint.
struct LateCancelStore {
    inner: InMemoryJobStore,
}

#[async_trait]
impl JobStore for LateCancelStore {
    async fn insert(&self, job: Job) -> Result<(), JobStoreError> {
        self.inner.insert(job).await
    }

    async fn update(&self, id: Uuid, patch: JobPatch) -> Result<Job, JobStoreError> {
        let at_embedding = patch
            .progress
            .as_ref()
            .is_some_and(|progress| progress.stage == "embedding");
        let job = self.inner.update(id, patch).await?;
        if at_embedding {
            self.inner.request_cancel(id).await?;
        }
        Ok(job)
    }

    async fn fetch(&self, id: Uuid) -> Result<Job, JobStoreError> {
        self.inner.fetch(id).await
    }

    async fn recent(&self, filter: JobFilter) -> Result<Vec<Job>, JobStoreError> {
        self.inner.recent(filter).await
    }

    async fn request_cancel(&self, id: Uuid) -> Result<Job, JobStoreError> {
        self.inner.request_cancel(id).await
    }
}

#[tokio::test]
async fn cancel_after_the_checkpoint_still_finishes_the_job() {
    let storage_root = std::env::temp_dir().join(format!("taonga-it-late-{}", Uuid::new_v4()));
    let vector_store = Arc::new(CountingVectorStore::default());
    let jobs = Arc::new(LateCancelStore {
        inner: InMemoryJobStore::new(),
    });
    let broker = Arc::new(InProcessBroker::new());
    let metrics = Arc::new(PipelineMetrics::new());

    let scheduler = JobScheduler::new(build_context(
        ExecutionMode::Embedded,
        3,
        jobs.clone(),
        broker,
        metrics,
        vector_store.clone(),
        storage_root.clone(),
    ));

    tokio::fs::create_dir_all(&storage_root).await.unwrap();
    tokio::fs::write(storage_root.join("doc.txt"), b"cancelled too late")
        .await
        .unwrap();

    let response = scheduler
        .enqueue(EnqueueRequest {
            payload_ref: "doc.txt".to_string(),
            realm: None,
            page_estimate: None,
        })
        .await
        .unwrap();

    // the flag arrived after the checkpoint, so the run completes
    assert_eq!(response.status, JobStatus::Finished);
    let job = jobs.fetch(response.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Finished);
    assert!(job.cancel_requested);
    assert_eq!(vector_store.upserts.load(Ordering::SeqCst), 1);

    tokio::fs::remove_dir_all(storage_root).await.ok();
}

fn two_page_pdf() -> Vec<u8> {
    use lopdf::{Document, Object, dictionary};
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..2)
        .map(|_| {
            doc.add_object(dictionary! {"Type" => "Page", "Parent" => pages_id})
                .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => 2,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {"Type" => "Catalog", "Pages" => pages_id});
    doc.trailer.set("Root", catalog_id);
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("in-memory pdf save");
    bytes
}

#[tokio::test]
async fn pdf_payload_without_an_estimate_routes_by_its_page_count() {
    let h = harness(ExecutionMode::Distributed, 3, "pdf-route");

    tokio::fs::create_dir_all(&h.storage_root).await.unwrap();
    tokio::fs::write(h.storage_root.join("scan.pdf"), two_page_pdf())
        .await
        .unwrap();

    let response = h
        .scheduler
        .enqueue(EnqueueRequest {
            payload_ref: "scan.pdf".to_string(),
            realm: None,
            page_estimate: None,
        })
        .await
        .unwrap();

    // two pages puts the job in the urgent lane
    assert_eq!(response.lane, Lane::Urgent);
    assert_eq!(h.broker.backlog(Lane::Urgent).await.unwrap(), 1);

    tokio::fs::remove_dir_all(h.storage_root).await.ok();
}

#[tokio::test]
async fn exhausted_retries_dead_letter_exactly_once() {
    // zero retries: the first failure exhausts the budget immediately
    let h = harness(ExecutionMode::Distributed, 0, "dead");

    let response = h
        .scheduler
        .enqueue(EnqueueRequest {
            payload_ref: "missing/doc.txt".to_string(),
            realm: None,
            page_estimate: None,
        })
        .await
        .unwrap();

    let worker = Worker::new(JobScheduler::new(h.scheduler.context()), vec![Lane::Default]);
    assert!(worker.poll_once().await.unwrap());

    let job = h.jobs.fetch(response.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.lane, Lane::Dead);
    assert_eq!(job.retry_count, 0);
    assert!(job.error.expect("error recorded").contains("payload"));

    assert_eq!(h.broker.backlog(Lane::Dead).await.unwrap(), 1);
    assert_eq!(h.metrics.snapshot().jobs_dead_lettered, 1);

    // dead-lettering is idempotent once the job sits in the dead lane
    h.scheduler.dead_letter(response.job_id).await.unwrap();
    assert_eq!(h.broker.backlog(Lane::Dead).await.unwrap(), 1);
    assert_eq!(h.metrics.snapshot().jobs_dead_lettered, 1);

    tokio::fs::remove_dir_all(h.storage_root).await.ok();
}
