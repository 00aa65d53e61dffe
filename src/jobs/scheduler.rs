//! Dual-mode job scheduling over the pipeline.
//!
//! One global execution-mode switch decides what an enqueue means: in
//! embedded mode the job runs synchronously in the caller's context and the
//! response carries the terminal result; in distributed mode the job is
//! handed to a broker lane and executed by a worker process. Both paths
//! share the tracking wrapper that moves the durable job record through its
//! lifecycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::{ExecutionMode, LaneOverrides};
use crate::extract::pdf::estimate_page_count;
use crate::extract::{DocumentInput, classify};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::processing::pipeline::{IngestRequest, NoopObserver, Pipeline, PipelineOutcome, RunObserver};
use crate::processing::types::{PipelineRun, RunStatus, truncate_error};

use super::broker::{QueueBroker, QueuedJob};
use super::store::{JobPatch, JobStore, JobStoreError};
use super::types::{Job, JobFilter, JobProgress, JobStatus, Lane, classify_lane};

/// Backoff schedule applied between retries, in seconds.
pub const RETRY_BACKOFF_SECS: [u64; 3] = [10, 30, 60];

/// Errors surfaced by scheduling operations.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The broker refused or could not accept the job.
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),
    /// Job store failure.
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Enqueue request accepted by the scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueRequest {
    /// Reference to the document payload, relative to the storage root.
    pub payload_ref: String,
    /// Optional tenant scope.
    pub realm: Option<String>,
    /// Page estimate used for lane routing; absent for non-PDF documents.
    pub page_estimate: Option<usize>,
}

/// Enqueue response envelope. In embedded mode the status is terminal and
/// the result is populated; in distributed mode the status is `queued`.
#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    /// Tracked job id.
    pub job_id: Uuid,
    /// Lane the job was routed to.
    pub lane: Lane,
    /// Job status at response time.
    pub status: JobStatus,
    /// Terminal result, embedded mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Terminal error, embedded mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Backlog and policy report for one lane.
#[derive(Debug, Serialize)]
pub struct LaneHealth {
    /// Lane name.
    pub lane: Lane,
    /// Jobs waiting in the lane queue.
    pub backlog: usize,
    /// Execution timeout in seconds; null means unbounded.
    pub timeout_secs: Option<u64>,
    /// Result retention in seconds.
    pub retention_secs: u64,
}

/// Queue health report.
#[derive(Debug, Serialize)]
pub struct QueueHealth {
    /// Active execution mode.
    pub mode: ExecutionMode,
    /// Broker liveness; null in embedded mode where no broker is involved.
    pub broker_reachable: Option<bool>,
    /// Per-lane backlog and policy.
    pub lanes: Vec<LaneHealth>,
}

/// Shared dependency context for scheduling and execution.
pub struct PipelineContext {
    /// The document pipeline.
    pub pipeline: Pipeline,
    /// Durable job tracking.
    pub jobs: Arc<dyn JobStore>,
    /// Lane queues.
    pub broker: Arc<dyn QueueBroker>,
    /// Shared counters.
    pub metrics: Arc<PipelineMetrics>,
    /// Execution mode switch.
    pub mode: ExecutionMode,
    /// Retry budget for distributed execution.
    pub max_retries: u32,
    /// Root directory payload references resolve against.
    pub storage_root: PathBuf,
    /// Per-lane timeout overrides.
    pub lane_timeouts: LaneOverrides,
    /// Per-lane retention overrides.
    pub lane_retentions: LaneOverrides,
}

impl PipelineContext {
    /// Assemble the full dependency graph from the loaded configuration.
    ///
    /// Probes the Tesseract binary once at startup; when the probe fails the
    /// offline OCR engine is left out of the chain.
    pub async fn from_config() -> Result<Self, crate::vector_store::VectorStoreError> {
        use crate::codec::CulturalCodec;
        use crate::config::get_config;
        use crate::embedding::get_embedding_client;
        use crate::extract::Extractor;
        use crate::extract::ocr::{OcrChain, OcrEngine, TesseractEngine, VisionOcrClient};
        use crate::processing::embed_store::PersistenceCoordinator;
        use crate::storage::{ArtifactStore, HttpObjectStore, LocalObjectStore, ObjectStore};
        use crate::summarize::get_summarization_client;
        use crate::vector_store::HttpVectorStore;
        use super::broker::{HttpBroker, InProcessBroker};
        use super::store::{HttpJobStore, InMemoryJobStore};

        let config = get_config();

        let tesseract = TesseractEngine::new(
            config
                .tesseract_path
                .clone()
                .unwrap_or_else(|| "tesseract".to_string()),
        );
        let offline: Option<Box<dyn OcrEngine>> = if tesseract.probe().await {
            Some(Box::new(tesseract))
        } else {
            tracing::warn!("tesseract probe failed; offline OCR disabled");
            None
        };
        let vision: Option<Box<dyn OcrEngine>> = config
            .ocr_fallback_url
            .clone()
            .map(|url| Box::new(VisionOcrClient::new(url)) as Box<dyn OcrEngine>);
        let extractor = Extractor::new(
            OcrChain::new(offline, vision),
            config.max_pdf_pages,
            config.max_inline_image_ocr,
        );

        let remote: Option<Box<dyn ObjectStore>> = config
            .object_store_url
            .clone()
            .map(|url| Box::new(HttpObjectStore::new(url)) as Box<dyn ObjectStore>);
        let artifacts = ArtifactStore::new(
            remote,
            Box::new(LocalObjectStore::new(config.storage_root.clone())),
        );

        let coordinator = PersistenceCoordinator::new(
            get_embedding_client(),
            Box::new(HttpVectorStore::from_config()?),
            artifacts,
            get_summarization_client(),
            config.summary_model.clone(),
        );
        let pipeline = Pipeline::new(
            extractor,
            CulturalCodec::new(),
            coordinator,
            config.chunk_char_budget,
            config.execution_mode,
        );

        let broker: Arc<dyn QueueBroker> = match (config.execution_mode, &config.broker_url) {
            (ExecutionMode::Distributed, Some(url)) => Arc::new(HttpBroker::new(url.clone())),
            _ => Arc::new(InProcessBroker::new()),
        };
        // Distributed processes must share one durable store; the tracking
        // service defaults to the broker host.
        let tracking_url = config
            .job_store_url
            .clone()
            .or_else(|| config.broker_url.clone());
        let jobs: Arc<dyn JobStore> = match (config.execution_mode, tracking_url) {
            (ExecutionMode::Distributed, Some(url)) => Arc::new(HttpJobStore::new(url)),
            _ => Arc::new(InMemoryJobStore::new()),
        };

        Ok(Self {
            pipeline,
            jobs,
            broker,
            metrics: Arc::new(PipelineMetrics::new()),
            mode: config.execution_mode,
            max_retries: config.max_job_retries,
            storage_root: config.storage_root.clone(),
            lane_timeouts: config.lane_timeout_secs,
            lane_retentions: config.lane_retention_secs,
        })
    }
}

/// How one execution attempt ended, before any retry decision.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The run completed and the job is terminal (`finished`).
    Finished,
    /// The job was cancelled, either before dequeue or at the checkpoint.
    Cancelled,
    /// The attempt failed; the caller decides between retry and finalize.
    Failed(String),
}

/// Operations the HTTP layer needs from the scheduler.
#[async_trait]
pub trait SchedulerApi: Send + Sync + 'static {
    /// Run a document synchronously and return the full run record.
    async fn ingest(&self, request: IngestRequest) -> PipelineRun;
    /// Accept a job according to the execution mode.
    async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueResponse, ScheduleError>;
    /// Fetch one job record.
    async fn job(&self, id: Uuid) -> Result<Job, ScheduleError>;
    /// Recent jobs, newest first.
    async fn recent_jobs(&self, filter: JobFilter) -> Result<Vec<Job>, ScheduleError>;
    /// Request cancellation of a job.
    async fn cancel(&self, id: Uuid) -> Result<Job, ScheduleError>;
    /// Queue health report.
    async fn queue_health(&self) -> QueueHealth;
    /// Current metrics counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Observer wiring run milestones into the durable job record.
struct StoreObserver {
    jobs: Arc<dyn JobStore>,
    job_id: Uuid,
}

#[async_trait]
impl RunObserver for StoreObserver {
    async fn on_progress(&self, stage: &str, percent: u8) {
        let patch = JobPatch {
            progress: Some(JobProgress {
                stage: stage.to_string(),
                percent,
            }),
            ..Default::default()
        };
        if let Err(error) = self.jobs.update(self.job_id, patch).await {
            tracing::debug!(job_id = %self.job_id, %error, "progress update dropped");
        }
    }

    async fn is_cancelled(&self) -> bool {
        match self.jobs.fetch(self.job_id).await {
            Ok(job) => job.cancel_requested || job.status == JobStatus::Cancelled,
            Err(_) => false,
        }
    }
}

/// The scheduler: accepts, executes, and reports on jobs.
pub struct JobScheduler {
    ctx: Arc<PipelineContext>,
}

impl JobScheduler {
    /// Create a scheduler over the shared context.
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// The shared context, for workers.
    pub fn context(&self) -> Arc<PipelineContext> {
        Arc::clone(&self.ctx)
    }

    /// Execute one attempt of a job under the tracking wrapper.
    ///
    /// Moves the record `queued → running`, streams progress, honors the
    /// cancellation checkpoint, and finalizes `finished` itself. Failures are
    /// returned to the caller undecided so the retry policy stays with the
    /// execution substrate.
    pub async fn execute_attempt(
        &self,
        job_id: Uuid,
        timeout: Option<Duration>,
    ) -> Result<AttemptOutcome, ScheduleError> {
        let job = self.ctx.jobs.fetch(job_id).await?;
        if job.status == JobStatus::Cancelled {
            return Ok(AttemptOutcome::Cancelled);
        }

        let started_at = OffsetDateTime::now_utc();
        self.ctx
            .jobs
            .update(
                job_id,
                JobPatch {
                    status: Some(JobStatus::Running),
                    started_at: Some(started_at),
                    ..Default::default()
                },
            )
            .await?;

        let payload_path = self.ctx.storage_root.join(&job.payload_ref);
        let bytes = match tokio::fs::read(&payload_path).await {
            Ok(bytes) => bytes,
            Err(error) => {
                return Ok(AttemptOutcome::Failed(format!(
                    "failed to read payload {}: {error}",
                    payload_path.display()
                )));
            }
        };
        let filename = payload_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| job.payload_ref.clone());

        let request = IngestRequest {
            filename,
            bytes,
            source_tag: job.realm.clone(),
            generate_summary: false,
        };
        let observer = StoreObserver {
            jobs: Arc::clone(&self.ctx.jobs),
            job_id,
        };

        let run_future = self.ctx.pipeline.run(request, &observer);
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, run_future).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Ok(AttemptOutcome::Failed(format!(
                        "execution exceeded the lane timeout of {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => run_future.await,
        };

        match outcome {
            PipelineOutcome::Cancelled { run_id } => {
                tracing::info!(%job_id, %run_id, "job cancelled at checkpoint");
                self.finalize(job_id, started_at, JobStatus::Cancelled, None, None)
                    .await?;
                Ok(AttemptOutcome::Cancelled)
            }
            PipelineOutcome::Completed(run) => {
                if run.status == RunStatus::Error {
                    let message = run
                        .error
                        .clone()
                        .unwrap_or_else(|| "pipeline run failed".to_string());
                    return Ok(AttemptOutcome::Failed(message));
                }
                self.ctx.metrics.record_run(run.chunks.len() as u64);
                let result = serde_json::to_value(run.as_ref()).unwrap_or_default();
                self.finalize(job_id, started_at, JobStatus::Finished, Some(result), None)
                    .await?;
                self.ctx.metrics.record_job_finished();
                Ok(AttemptOutcome::Finished)
            }
        }
    }

    /// Finalize a failed attempt: mark the record `failed` and dead-letter it.
    pub async fn finalize_failure(&self, job_id: Uuid, message: &str) -> Result<(), ScheduleError> {
        let job = self.ctx.jobs.fetch(job_id).await?;
        let started_at = job.started_at.unwrap_or(job.created_at);
        self.finalize(
            job_id,
            started_at,
            JobStatus::Failed,
            None,
            Some(truncate_error(message)),
        )
        .await?;
        self.ctx.metrics.record_job_failed();
        Ok(())
    }

    /// Move an exhausted job to the dead lane, exactly once.
    pub async fn dead_letter(&self, job_id: Uuid) -> Result<(), ScheduleError> {
        let job = self.ctx.jobs.fetch(job_id).await?;
        if job.lane == Lane::Dead {
            return Ok(());
        }
        self.ctx
            .jobs
            .update(
                job_id,
                JobPatch {
                    lane: Some(Lane::Dead),
                    ..Default::default()
                },
            )
            .await?;
        let envelope = QueuedJob {
            job_id,
            lane: Lane::Dead,
            payload_ref: job.payload_ref,
            realm: job.realm,
        };
        if let Err(error) = self.ctx.broker.enqueue(envelope).await {
            tracing::warn!(%job_id, %error, "dead-letter enqueue failed");
        }
        self.ctx.metrics.record_dead_letter();
        tracing::warn!(%job_id, retries = job.retry_count, "job dead-lettered");
        Ok(())
    }

    /// Schedule a retry after the backoff delay for the given attempt.
    pub async fn schedule_retry(
        &self,
        job_id: Uuid,
        attempt: u32,
        message: &str,
    ) -> Result<(), ScheduleError> {
        let job = self.ctx.jobs.fetch(job_id).await?;
        self.ctx
            .jobs
            .update(
                job_id,
                JobPatch {
                    status: Some(JobStatus::Queued),
                    retry_count: Some(attempt + 1),
                    error: Some(truncate_error(message)),
                    ..Default::default()
                },
            )
            .await?;

        let backoff_index = (attempt as usize).min(RETRY_BACKOFF_SECS.len() - 1);
        let delay = Duration::from_secs(RETRY_BACKOFF_SECS[backoff_index]);
        let broker = Arc::clone(&self.ctx.broker);
        let envelope = QueuedJob {
            job_id,
            lane: job.lane,
            payload_ref: job.payload_ref,
            realm: job.realm,
        };
        tracing::info!(%job_id, attempt = attempt + 1, delay_secs = delay.as_secs(), "retry scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(error) = broker.enqueue(envelope).await {
                tracing::error!(%job_id, %error, "retry enqueue failed");
            }
        });
        Ok(())
    }

    /// Timeout for a lane under the configured overrides.
    pub fn lane_timeout(&self, lane: Lane) -> Option<Duration> {
        lane.policy(&self.ctx.lane_timeouts, &self.ctx.lane_retentions)
            .timeout
    }

    /// Page estimate for PDF payloads that arrive without one.
    ///
    /// Non-PDF payloads and unreadable files report `None` and are routed by
    /// the no-estimate rule.
    async fn estimate_pdf_pages(&self, payload_ref: &str) -> Option<usize> {
        let path = self.ctx.storage_root.join(payload_ref);
        let filename = path.file_name()?.to_string_lossy().into_owned();
        if classify(&filename) != DocumentInput::Pdf {
            return None;
        }
        let bytes = tokio::fs::read(&path).await.ok()?;
        estimate_page_count(&bytes)
    }

    async fn finalize(
        &self,
        job_id: Uuid,
        started_at: OffsetDateTime,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<Job, ScheduleError> {
        let finished_at = OffsetDateTime::now_utc();
        let duration_secs = (finished_at - started_at).whole_seconds().max(0) as u64;
        let job = self
            .ctx
            .jobs
            .update(
                job_id,
                JobPatch {
                    status: Some(status),
                    result,
                    error,
                    finished_at: Some(finished_at),
                    duration_secs: Some(duration_secs),
                    ..Default::default()
                },
            )
            .await?;
        Ok(job)
    }
}

#[async_trait]
impl SchedulerApi for JobScheduler {
    async fn ingest(&self, request: IngestRequest) -> PipelineRun {
        match self.ctx.pipeline.run(request, &NoopObserver).await {
            PipelineOutcome::Completed(run) => {
                self.ctx.metrics.record_run(run.chunks.len() as u64);
                *run
            }
            PipelineOutcome::Cancelled { .. } => {
                // the noop observer never cancels
                unreachable!("synchronous ingest cannot be cancelled")
            }
        }
    }

    async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueResponse, ScheduleError> {
        let page_estimate = match request.page_estimate {
            Some(pages) => Some(pages),
            None => self.estimate_pdf_pages(&request.payload_ref).await,
        };
        let lane = classify_lane(page_estimate);
        let job = Job::queued(
            lane,
            self.ctx.mode,
            request.payload_ref.clone(),
            request.realm.clone(),
        );
        let job_id = job.id;
        self.ctx.jobs.insert(job).await?;
        tracing::info!(%job_id, lane = lane.as_str(), mode = ?self.ctx.mode, "job accepted");

        match self.ctx.mode {
            ExecutionMode::Embedded => {
                // Synchronous execution in the caller's context, one attempt.
                match self.execute_attempt(job_id, self.lane_timeout(lane)).await? {
                    AttemptOutcome::Failed(message) => {
                        self.finalize_failure(job_id, &message).await?;
                    }
                    AttemptOutcome::Finished | AttemptOutcome::Cancelled => {}
                }
                let job = self.ctx.jobs.fetch(job_id).await?;
                Ok(EnqueueResponse {
                    job_id,
                    lane: job.lane,
                    status: job.status,
                    result: job.result,
                    error: job.error,
                })
            }
            ExecutionMode::Distributed => {
                let envelope = QueuedJob {
                    job_id,
                    lane,
                    payload_ref: request.payload_ref,
                    realm: request.realm,
                };
                if let Err(error) = self.ctx.broker.enqueue(envelope).await {
                    let message = error.to_string();
                    self.finalize_failure(job_id, &message).await?;
                    return Err(ScheduleError::BrokerUnavailable(message));
                }
                Ok(EnqueueResponse {
                    job_id,
                    lane,
                    status: JobStatus::Queued,
                    result: None,
                    error: None,
                })
            }
        }
    }

    async fn job(&self, id: Uuid) -> Result<Job, ScheduleError> {
        Ok(self.ctx.jobs.fetch(id).await?)
    }

    async fn recent_jobs(&self, filter: JobFilter) -> Result<Vec<Job>, ScheduleError> {
        Ok(self.ctx.jobs.recent(filter).await?)
    }

    async fn cancel(&self, id: Uuid) -> Result<Job, ScheduleError> {
        let job = self.ctx.jobs.request_cancel(id).await?;
        tracing::info!(job_id = %id, status = ?job.status, "cancellation requested");
        Ok(job)
    }

    async fn queue_health(&self) -> QueueHealth {
        let broker_reachable = match self.ctx.mode {
            ExecutionMode::Embedded => None,
            ExecutionMode::Distributed => Some(self.ctx.broker.ping().await.is_ok()),
        };
        let mut lanes = Vec::with_capacity(Lane::ALL.len());
        for lane in Lane::ALL {
            let backlog = self.ctx.broker.backlog(lane).await.unwrap_or(0);
            let policy = lane.policy(&self.ctx.lane_timeouts, &self.ctx.lane_retentions);
            lanes.push(LaneHealth {
                lane,
                backlog,
                timeout_secs: policy.timeout.map(|t| t.as_secs()),
                retention_secs: policy.retention.as_secs(),
            });
        }
        QueueHealth {
            mode: self.ctx.mode,
            broker_reachable,
            lanes,
        }
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }
}
