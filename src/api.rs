//! HTTP surface for the Taonga pipeline.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /ingest` – Run a document through the pipeline synchronously and
//!   return the full run record.
//! - `POST /jobs` – Accept a job; embedded mode executes it inline and
//!   returns the terminal result, distributed mode queues it on a lane.
//! - `GET /jobs/{id}` – Fetch one job record with progress/result/error.
//! - `GET /jobs` – Recent jobs, filterable by lane/realm/status, newest
//!   first, capped at 500.
//! - `POST /jobs/{id}/cancel` – Advisory cancellation request.
//! - `GET /queue/health` – Execution mode, broker reachability, lane backlog.
//! - `GET /metrics` – Ingestion and job counters.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine as _;
use serde::Deserialize;
use uuid::Uuid;

use crate::jobs::scheduler::{EnqueueRequest, ScheduleError};
use crate::jobs::store::JobStoreError;
use crate::jobs::{JobFilter, SchedulerApi};
use crate::processing::pipeline::IngestRequest;
use crate::processing::types::PipelineRun;

/// Build the HTTP router exposing the pipeline and scheduler surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: SchedulerApi,
{
    Router::new()
        .route("/ingest", post(ingest_document::<S>))
        .route("/jobs", post(enqueue_job::<S>).get(recent_jobs::<S>))
        .route("/jobs/:id", get(get_job::<S>))
        .route("/jobs/:id/cancel", post(cancel_job::<S>))
        .route("/queue/health", get(queue_health::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Request body for `POST /ingest`.
#[derive(Deserialize)]
struct IngestBody {
    /// Filename used for document type classification.
    filename: String,
    /// Inline text payload.
    #[serde(default)]
    text: Option<String>,
    /// Binary payload, base64-encoded. Takes precedence over `text`.
    #[serde(default)]
    content_base64: Option<String>,
    /// Optional label for the submission source.
    #[serde(default)]
    source_tag: Option<String>,
    /// Whether to request summaries from the configured provider.
    #[serde(default)]
    generate_summary: bool,
}

/// Run a document through the pipeline in the caller's context.
async fn ingest_document<S>(
    State(service): State<Arc<S>>,
    Json(body): Json<IngestBody>,
) -> Result<Json<PipelineRun>, AppError>
where
    S: SchedulerApi,
{
    let bytes = match (&body.content_base64, &body.text) {
        (Some(encoded), _) => base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|error| AppError::BadRequest(format!("invalid content_base64: {error}")))?,
        (None, Some(text)) => text.clone().into_bytes(),
        (None, None) => {
            return Err(AppError::BadRequest(
                "one of text or content_base64 is required".to_string(),
            ));
        }
    };

    let run = service
        .ingest(IngestRequest {
            filename: body.filename,
            bytes,
            source_tag: body.source_tag,
            generate_summary: body.generate_summary,
        })
        .await;
    tracing::info!(run_id = %run.id, status = ?run.status, chunks = run.chunks.len(), "Ingest request completed");
    Ok(Json(run))
}

/// Accept a job according to the configured execution mode.
async fn enqueue_job<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<EnqueueRequest>,
) -> Result<Response, AppError>
where
    S: SchedulerApi,
{
    let response = service.enqueue(request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

/// Fetch one job record.
async fn get_job<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError>
where
    S: SchedulerApi,
{
    let job = service.job(id).await?;
    Ok(Json(job).into_response())
}

/// Query parameters for `GET /jobs`.
#[derive(Deserialize)]
struct JobsQuery {
    #[serde(default)]
    lane: Option<String>,
    #[serde(default)]
    realm: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Recent jobs, newest first.
async fn recent_jobs<S>(
    State(service): State<Arc<S>>,
    Query(query): Query<JobsQuery>,
) -> Result<Response, AppError>
where
    S: SchedulerApi,
{
    let lane = query
        .lane
        .as_deref()
        .map(|value| {
            value
                .parse()
                .map_err(|()| AppError::BadRequest(format!("unknown lane: {value}")))
        })
        .transpose()?;
    let status = query
        .status
        .as_deref()
        .map(|value| {
            serde_json::from_value(serde_json::Value::String(value.to_string()))
                .map_err(|_| AppError::BadRequest(format!("unknown status: {value}")))
        })
        .transpose()?;

    let jobs = service
        .recent_jobs(JobFilter {
            lane,
            realm: query.realm,
            status,
            limit: query.limit,
        })
        .await?;
    Ok(Json(jobs).into_response())
}

/// Request cancellation of a job.
async fn cancel_job<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError>
where
    S: SchedulerApi,
{
    let job = service.cancel(id).await?;
    Ok(Json(job).into_response())
}

/// Queue health report.
async fn queue_health<S>(State(service): State<Arc<S>>) -> Response
where
    S: SchedulerApi,
{
    Json(service.queue_health().await).into_response()
}

/// Ingestion and job counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Response
where
    S: SchedulerApi,
{
    Json(service.metrics_snapshot()).into_response()
}

/// Error envelope mapping scheduler failures onto HTTP statuses.
enum AppError {
    /// Malformed request.
    BadRequest(String),
    /// Scheduler-level failure.
    Schedule(ScheduleError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            AppError::Schedule(error) => {
                let status = match &error {
                    ScheduleError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    ScheduleError::Store(JobStoreError::NotFound(_)) => StatusCode::NOT_FOUND,
                    ScheduleError::Store(JobStoreError::InvalidTransition { .. }) => {
                        StatusCode::CONFLICT
                    }
                    ScheduleError::Store(_) => StatusCode::BAD_GATEWAY,
                };
                (status, error.to_string()).into_response()
            }
        }
    }
}

impl From<ScheduleError> for AppError {
    fn from(error: ScheduleError) -> Self {
        Self::Schedule(error)
    }
}
