//! Atomic counters describing ingestion and job activity.
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and job activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    chunks_embedded: AtomicU64,
    jobs_finished: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_dead_lettered: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed pipeline run and the number of chunks it embedded.
    pub fn record_run(&self, chunk_count: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_embedded.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a job that reached the `finished` state.
    pub fn record_job_finished(&self) {
        self.jobs_finished.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job that reached the `failed` state.
    pub fn record_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job re-submitted to the dead lane after exhausting retries.
    pub fn record_dead_letter(&self) {
        self.jobs_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_embedded: self.chunks_embedded.load(Ordering::Relaxed),
            jobs_finished: self.jobs_finished.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_dead_lettered: self.jobs_dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of documents that completed the pipeline since startup.
    pub documents_ingested: u64,
    /// Total chunk count embedded across all runs.
    pub chunks_embedded: u64,
    /// Jobs that reached the `finished` state.
    pub jobs_finished: u64,
    /// Jobs that reached the `failed` state.
    pub jobs_failed: u64,
    /// Jobs moved to the dead lane after retry exhaustion.
    pub jobs_dead_lettered: u64,
}
