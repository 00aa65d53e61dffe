//! Durable job tracking.
//!
//! The store owns the lifecycle invariants: terminal states are sinks, and
//! cancellation is a request flag plus an immediate transition only for jobs
//! that have not started running. Embedded mode tracks jobs in process;
//! distributed mode talks to a shared tracking service so every worker sees
//! the same records.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::types::{Job, JobFilter, JobProgress, JobStatus, Lane, RECENT_JOBS_CAP};

/// Errors surfaced by job store operations.
#[derive(Debug, Error)]
pub enum JobStoreError {
    /// No job with the given id.
    #[error("Job not found: {0}")]
    NotFound(Uuid),
    /// The requested update would leave a terminal state.
    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current status of the job.
        from: JobStatus,
        /// Status the update asked for.
        to: JobStatus,
    },
    /// The tracking service cannot be reached.
    #[error("Job store unavailable: {0}")]
    Unavailable(String),
    /// The tracking service answered with a non-success status.
    #[error("Job store returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code of the response.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// Partial update applied to one job record.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct JobPatch {
    /// New lifecycle state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    /// New lane (used when dead-lettering).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<Lane>,
    /// Executor progress report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    /// Terminal result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Terminal error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Execution start time.
    #[serde(with = "time::serde::rfc3339::option")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<OffsetDateTime>,
    /// Terminal time.
    #[serde(with = "time::serde::rfc3339::option")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<OffsetDateTime>,
    /// Wall-clock execution seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    /// New retry count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

/// Interface implemented by job tracking backends.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Record a new job.
    async fn insert(&self, job: Job) -> Result<(), JobStoreError>;
    /// Apply a partial update, enforcing terminal-sink semantics.
    async fn update(&self, id: Uuid, patch: JobPatch) -> Result<Job, JobStoreError>;
    /// Fetch one job by id.
    async fn fetch(&self, id: Uuid) -> Result<Job, JobStoreError>;
    /// Recent jobs matching the filter, newest first, capped at 500.
    async fn recent(&self, filter: JobFilter) -> Result<Vec<Job>, JobStoreError>;
    /// Request cancellation. Queued jobs move to `cancelled` immediately;
    /// running jobs get the advisory flag; terminal jobs are untouched.
    async fn request_cancel(&self, id: Uuid) -> Result<Job, JobStoreError>;
}

/// Job store backed by an in-process map.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), JobStoreError> {
        self.jobs.lock().await.insert(job.id, job);
        Ok(())
    }

    async fn update(&self, id: Uuid, patch: JobPatch) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;

        if let Some(status) = patch.status {
            if job.status.is_terminal() && status != job.status {
                return Err(JobStoreError::InvalidTransition {
                    from: job.status,
                    to: status,
                });
            }
            job.status = status;
        }
        if let Some(lane) = patch.lane {
            job.lane = lane;
        }
        if let Some(progress) = patch.progress {
            job.progress = Some(progress);
        }
        if let Some(result) = patch.result {
            job.result = Some(result);
        }
        if let Some(error) = patch.error {
            job.error = Some(error);
        }
        if let Some(started_at) = patch.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(finished_at) = patch.finished_at {
            job.finished_at = Some(finished_at);
        }
        if let Some(duration_secs) = patch.duration_secs {
            job.duration_secs = Some(duration_secs);
        }
        if let Some(retry_count) = patch.retry_count {
            job.retry_count = retry_count;
        }
        Ok(job.clone())
    }

    async fn fetch(&self, id: Uuid) -> Result<Job, JobStoreError> {
        self.jobs
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(JobStoreError::NotFound(id))
    }

    async fn recent(&self, filter: JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.lock().await;
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|job| filter.lane.is_none_or(|lane| job.lane == lane))
            .filter(|job| {
                filter
                    .realm
                    .as_deref()
                    .is_none_or(|realm| job.realm.as_deref() == Some(realm))
            })
            .filter(|job| filter.status.is_none_or(|status| job.status == status))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let limit = filter.limit.unwrap_or(RECENT_JOBS_CAP).min(RECENT_JOBS_CAP);
        matched.truncate(limit);
        Ok(matched)
    }

    async fn request_cancel(&self, id: Uuid) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;

        if job.status.is_terminal() {
            return Ok(job.clone());
        }
        job.cancel_requested = true;
        if job.status == JobStatus::Queued {
            job.status = JobStatus::Cancelled;
            job.finished_at = Some(OffsetDateTime::now_utc());
        }
        Ok(job.clone())
    }
}

/// Client for a shared job tracking service.
///
/// In distributed mode every server and worker process points at the same
/// service, so lifecycle transitions made by one process are visible to the
/// rest. The service enforces the same terminal-sink semantics and reports
/// refused transitions with a `409` carrying the conflicting states.
pub struct HttpJobStore {
    http: Client,
    base_url: String,
}

impl HttpJobStore {
    /// Create a client for the given tracking service base URL.
    pub fn new(base_url: String) -> Self {
        let http = Client::builder()
            .user_agent("taonga/jobs")
            .build()
            .expect("Failed to construct reqwest::Client for job tracking");
        Self { http, base_url }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn read_job(response: reqwest::Response) -> Result<Job, JobStoreError> {
        response
            .json()
            .await
            .map_err(|error| JobStoreError::Unavailable(error.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TransitionConflict {
    from: JobStatus,
    to: JobStatus,
}

#[async_trait]
impl JobStore for HttpJobStore {
    async fn insert(&self, job: Job) -> Result<(), JobStoreError> {
        let response = self
            .http
            .post(self.endpoint("jobs"))
            .json(&job)
            .send()
            .await
            .map_err(|error| JobStoreError::Unavailable(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobStoreError::UnexpectedStatus { status, body });
        }
        Ok(())
    }

    async fn update(&self, id: Uuid, patch: JobPatch) -> Result<Job, JobStoreError> {
        let response = self
            .http
            .patch(self.endpoint(&format!("jobs/{id}")))
            .json(&patch)
            .send()
            .await
            .map_err(|error| JobStoreError::Unavailable(error.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(JobStoreError::NotFound(id));
        }
        if status == StatusCode::CONFLICT {
            let body = response.text().await.unwrap_or_default();
            if let Ok(conflict) = serde_json::from_str::<TransitionConflict>(&body) {
                return Err(JobStoreError::InvalidTransition {
                    from: conflict.from,
                    to: conflict.to,
                });
            }
            return Err(JobStoreError::UnexpectedStatus { status, body });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobStoreError::UnexpectedStatus { status, body });
        }
        Self::read_job(response).await
    }

    async fn fetch(&self, id: Uuid) -> Result<Job, JobStoreError> {
        let response = self
            .http
            .get(self.endpoint(&format!("jobs/{id}")))
            .send()
            .await
            .map_err(|error| JobStoreError::Unavailable(error.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(JobStoreError::NotFound(id));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobStoreError::UnexpectedStatus { status, body });
        }
        Self::read_job(response).await
    }

    async fn recent(&self, filter: JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(lane) = filter.lane {
            query.push(("lane", lane.as_str().to_string()));
        }
        if let Some(realm) = &filter.realm {
            query.push(("realm", realm.clone()));
        }
        if let Some(status) = filter.status {
            query.push(("status", status.as_str().to_string()));
        }
        if let Some(limit) = filter.limit {
            query.push(("limit", limit.to_string()));
        }

        let response = self
            .http
            .get(self.endpoint("jobs"))
            .query(&query)
            .send()
            .await
            .map_err(|error| JobStoreError::Unavailable(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobStoreError::UnexpectedStatus { status, body });
        }
        response
            .json()
            .await
            .map_err(|error| JobStoreError::Unavailable(error.to_string()))
    }

    async fn request_cancel(&self, id: Uuid) -> Result<Job, JobStoreError> {
        let response = self
            .http
            .post(self.endpoint(&format!("jobs/{id}/cancel")))
            .send()
            .await
            .map_err(|error| JobStoreError::Unavailable(error.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(JobStoreError::NotFound(id));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobStoreError::UnexpectedStatus { status, body });
        }
        Self::read_job(response).await
    }
}
