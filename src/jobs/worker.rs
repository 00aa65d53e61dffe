//! Lane-polling worker loop for distributed execution.

use std::time::Duration;

use super::broker::QueuedJob;
use super::scheduler::{AttemptOutcome, JobScheduler, ScheduleError};
use super::types::Lane;

/// How long the loop sleeps when every polled lane is empty.
const IDLE_SLEEP: Duration = Duration::from_secs(2);

/// A worker polling broker lanes in priority order.
pub struct Worker {
    scheduler: JobScheduler,
    lanes: Vec<Lane>,
}

impl Worker {
    /// Create a worker over the given lanes, polled in the order given.
    pub fn new(scheduler: JobScheduler, lanes: Vec<Lane>) -> Self {
        Self { scheduler, lanes }
    }

    /// Poll the lanes once, executing at most one job.
    ///
    /// Returns whether a job was processed, so the outer loop knows when to
    /// back off.
    pub async fn poll_once(&self) -> Result<bool, ScheduleError> {
        let ctx = self.scheduler.context();
        for lane in &self.lanes {
            let envelope = match ctx.broker.dequeue(*lane).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => continue,
                Err(error) => {
                    tracing::warn!(lane = lane.as_str(), %error, "lane dequeue failed");
                    continue;
                }
            };
            self.process(envelope).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Run forever, sleeping briefly whenever the lanes are idle.
    pub async fn run(&self) {
        tracing::info!(lanes = ?self.lanes.iter().map(|l| l.as_str()).collect::<Vec<_>>(), "worker started");
        loop {
            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(IDLE_SLEEP).await,
                Err(error) => {
                    tracing::error!(%error, "job execution failed at the tracking boundary");
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
            }
        }
    }

    async fn process(&self, envelope: QueuedJob) -> Result<(), ScheduleError> {
        let ctx = self.scheduler.context();
        let timeout = self.scheduler.lane_timeout(envelope.lane);
        tracing::info!(job_id = %envelope.job_id, lane = envelope.lane.as_str(), "executing job");

        match self
            .scheduler
            .execute_attempt(envelope.job_id, timeout)
            .await?
        {
            AttemptOutcome::Finished | AttemptOutcome::Cancelled => Ok(()),
            AttemptOutcome::Failed(message) => {
                let job = ctx.jobs.fetch(envelope.job_id).await?;
                if job.retry_count < ctx.max_retries {
                    self.scheduler
                        .schedule_retry(envelope.job_id, job.retry_count, &message)
                        .await
                } else {
                    self.scheduler
                        .finalize_failure(envelope.job_id, &message)
                        .await?;
                    self.scheduler.dead_letter(envelope.job_id).await
                }
            }
        }
    }
}
