//! Job, lane, and status types shared by the scheduler, store, and broker.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::{ExecutionMode, LaneOverrides};

/// Hard cap on the number of records a recent-jobs query may return.
pub const RECENT_JOBS_CAP: usize = 500;

/// Priority lanes jobs are routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// Small documents, tight deadline.
    Urgent,
    /// The common case.
    Default,
    /// Large documents.
    Slow,
    /// Jobs that exhausted their retries; never polled for execution.
    Dead,
}

impl Lane {
    /// All lanes, used for health reporting.
    pub const ALL: [Lane; 4] = [Lane::Urgent, Lane::Default, Lane::Slow, Lane::Dead];

    /// Lanes a worker polls, highest priority first.
    pub const EXECUTABLE: [Lane; 3] = [Lane::Urgent, Lane::Default, Lane::Slow];

    /// Lane name as used in queue addressing and query parameters.
    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Urgent => "urgent",
            Lane::Default => "default",
            Lane::Slow => "slow",
            Lane::Dead => "dead",
        }
    }

    /// Timeout and retention policy for this lane, with env overrides applied.
    pub fn policy(self, timeouts: &LaneOverrides, retentions: &LaneOverrides) -> LanePolicy {
        let (default_timeout, default_retention) = match self {
            Lane::Urgent => (Some(600), 2 * 3600),
            Lane::Default => (Some(1800), 24 * 3600),
            Lane::Slow => (Some(3600), 48 * 3600),
            Lane::Dead => (None, 7 * 24 * 3600),
        };
        let override_for = |overrides: &LaneOverrides| match self {
            Lane::Urgent => overrides.urgent,
            Lane::Default => overrides.default,
            Lane::Slow => overrides.slow,
            Lane::Dead => overrides.dead,
        };
        LanePolicy {
            timeout: override_for(timeouts)
                .or(default_timeout)
                .map(Duration::from_secs),
            retention: Duration::from_secs(override_for(retentions).unwrap_or(default_retention)),
        }
    }
}

impl std::str::FromStr for Lane {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "urgent" => Ok(Lane::Urgent),
            "default" => Ok(Lane::Default),
            "slow" => Ok(Lane::Slow),
            "dead" => Ok(Lane::Dead),
            _ => Err(()),
        }
    }
}

/// Execution deadline and result retention for one lane.
#[derive(Debug, Clone, Copy)]
pub struct LanePolicy {
    /// Wall-clock execution cap; `None` means unbounded.
    pub timeout: Option<Duration>,
    /// How long terminal results are kept.
    pub retention: Duration,
}

/// Route a job to a lane by its page estimate.
///
/// Only PDFs get an estimate; everything else arrives with `None` and lands
/// in the default lane.
pub fn classify_lane(page_estimate: Option<usize>) -> Lane {
    match page_estimate {
        Some(pages) if pages <= 3 => Lane::Urgent,
        Some(pages) if pages <= 50 => Lane::Default,
        Some(_) => Lane::Slow,
        None => Lane::Default,
    }
}

/// Lifecycle states of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, waiting for an executor.
    Queued,
    /// Being executed.
    Running,
    /// Completed with a result.
    Finished,
    /// Execution failed.
    Failed,
    /// Cancelled before the run's checkpoint.
    Cancelled,
}

impl JobStatus {
    /// Terminal states are sinks; no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Status name as used in JSON and query parameters.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Executor-reported progress on a running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Pipeline stage currently executing.
    pub stage: String,
    /// Rough completion percentage.
    pub percent: u8,
}

/// One tracked job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub id: Uuid,
    /// Lane the job is routed through.
    pub lane: Lane,
    /// Execution mode the job was accepted under.
    pub mode: ExecutionMode,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Reference to the document payload, relative to the storage root.
    pub payload_ref: String,
    /// Optional tenant scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    /// Latest executor-reported progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    /// Terminal result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Terminal error message, truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether a caller has asked for cancellation. Advisory; the executor
    /// honors it at the run's single checkpoint.
    pub cancel_requested: bool,
    /// When the job was accepted.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When execution started.
    #[serde(with = "time::serde::rfc3339::option")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<OffsetDateTime>,
    /// When the job reached a terminal state.
    #[serde(with = "time::serde::rfc3339::option")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<OffsetDateTime>,
    /// Wall-clock execution time in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    /// How many times execution has been retried.
    pub retry_count: u32,
}

impl Job {
    /// Create a freshly queued job.
    pub fn queued(
        lane: Lane,
        mode: ExecutionMode,
        payload_ref: String,
        realm: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lane,
            mode,
            status: JobStatus::Queued,
            payload_ref,
            realm,
            progress: None,
            result: None,
            error: None,
            cancel_requested: false,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            finished_at: None,
            duration_secs: None,
            retry_count: 0,
        }
    }
}

/// Filter for the recent-jobs query.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Restrict to one lane.
    pub lane: Option<Lane>,
    /// Restrict to one realm.
    pub realm: Option<String>,
    /// Restrict to one status.
    pub status: Option<JobStatus>,
    /// Result cap; clamped to [`RECENT_JOBS_CAP`].
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_classification_routes_by_page_estimate() {
        assert_eq!(classify_lane(Some(2)), Lane::Urgent);
        assert_eq!(classify_lane(Some(3)), Lane::Urgent);
        assert_eq!(classify_lane(Some(4)), Lane::Default);
        assert_eq!(classify_lane(Some(10)), Lane::Default);
        assert_eq!(classify_lane(Some(50)), Lane::Default);
        assert_eq!(classify_lane(Some(75)), Lane::Slow);
        assert_eq!(classify_lane(None), Lane::Default);
    }

    #[test]
    fn terminal_states_are_marked() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Finished.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn lane_policy_defaults_match_the_routing_table() {
        let none = LaneOverrides::default();
        let urgent = Lane::Urgent.policy(&none, &none);
        assert_eq!(urgent.timeout, Some(Duration::from_secs(600)));
        assert_eq!(urgent.retention, Duration::from_secs(2 * 3600));

        let dead = Lane::Dead.policy(&none, &none);
        assert_eq!(dead.timeout, None);
    }

    #[test]
    fn lane_policy_honors_overrides() {
        let timeouts = LaneOverrides {
            slow: Some(10),
            ..Default::default()
        };
        let policy = Lane::Slow.policy(&timeouts, &LaneOverrides::default());
        assert_eq!(policy.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn lane_parses_from_query_strings() {
        assert_eq!("urgent".parse::<Lane>(), Ok(Lane::Urgent));
        assert_eq!("DEAD".parse::<Lane>(), Ok(Lane::Dead));
        assert!("express".parse::<Lane>().is_err());
    }
}
