//! Queue brokers: an in-process bounded channel and an external HTTP broker.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender};
use uuid::Uuid;

use super::types::Lane;

/// Default depth of each in-process lane channel.
const LANE_CAPACITY: usize = 1024;

/// Errors surfaced by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker cannot be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
    /// The lane queue is at capacity.
    #[error("Lane {lane} is full")]
    Full {
        /// Lane that refused the job.
        lane: &'static str,
    },
    /// The broker answered with a non-success status.
    #[error("Broker returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code of the response.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// Envelope handed to a lane queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    /// Tracked job id.
    pub job_id: Uuid,
    /// Lane the job was routed to.
    pub lane: Lane,
    /// Reference to the document payload.
    pub payload_ref: String,
    /// Optional tenant scope.
    pub realm: Option<String>,
}

/// Interface implemented by queue brokers.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Add a job to its lane queue.
    async fn enqueue(&self, job: QueuedJob) -> Result<(), BrokerError>;
    /// Take the next job from a lane, if any.
    async fn dequeue(&self, lane: Lane) -> Result<Option<QueuedJob>, BrokerError>;
    /// Number of jobs waiting in a lane.
    async fn backlog(&self, lane: Lane) -> Result<usize, BrokerError>;
    /// Broker liveness probe.
    async fn ping(&self) -> Result<(), BrokerError>;
}

struct LaneChannel {
    sender: Sender<QueuedJob>,
    receiver: Mutex<Receiver<QueuedJob>>,
}

/// Broker backed by one bounded channel per lane, for single-process setups.
pub struct InProcessBroker {
    lanes: HashMap<Lane, LaneChannel>,
}

impl InProcessBroker {
    /// Create a broker with the default per-lane capacity.
    pub fn new() -> Self {
        Self::with_capacity(LANE_CAPACITY)
    }

    /// Create a broker with an explicit per-lane capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let lanes = Lane::ALL
            .into_iter()
            .map(|lane| {
                let (sender, receiver) = mpsc::channel(capacity);
                (
                    lane,
                    LaneChannel {
                        sender,
                        receiver: Mutex::new(receiver),
                    },
                )
            })
            .collect();
        Self { lanes }
    }

    fn lane(&self, lane: Lane) -> &LaneChannel {
        // the map is populated for every lane at construction
        self.lanes.get(&lane).expect("lane channel exists")
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBroker for InProcessBroker {
    async fn enqueue(&self, job: QueuedJob) -> Result<(), BrokerError> {
        let lane = job.lane;
        self.lane(lane)
            .sender
            .try_send(job)
            .map_err(|error| match error {
                mpsc::error::TrySendError::Full(_) => BrokerError::Full {
                    lane: lane.as_str(),
                },
                mpsc::error::TrySendError::Closed(_) => {
                    BrokerError::Unavailable("lane channel closed".to_string())
                }
            })
    }

    async fn dequeue(&self, lane: Lane) -> Result<Option<QueuedJob>, BrokerError> {
        let mut receiver = self.lane(lane).receiver.lock().await;
        match receiver.try_recv() {
            Ok(job) => Ok(Some(job)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(BrokerError::Unavailable(
                "lane channel closed".to_string(),
            )),
        }
    }

    async fn backlog(&self, lane: Lane) -> Result<usize, BrokerError> {
        let sender = &self.lane(lane).sender;
        Ok(sender.max_capacity() - sender.capacity())
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Client for an external HTTP broker.
pub struct HttpBroker {
    http: Client,
    base_url: String,
}

impl HttpBroker {
    /// Create a client for the given broker base URL.
    pub fn new(base_url: String) -> Self {
        let http = Client::builder()
            .user_agent("taonga/broker")
            .build()
            .expect("Failed to construct reqwest::Client for broker");
        Self { http, base_url }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
struct BacklogResponse {
    depth: usize,
}

#[async_trait]
impl QueueBroker for HttpBroker {
    async fn enqueue(&self, job: QueuedJob) -> Result<(), BrokerError> {
        let url = self.endpoint(&format!("lanes/{}/jobs", job.lane.as_str()));
        let response = self
            .http
            .post(&url)
            .json(&job)
            .send()
            .await
            .map_err(|error| BrokerError::Unavailable(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::UnexpectedStatus { status, body });
        }
        Ok(())
    }

    async fn dequeue(&self, lane: Lane) -> Result<Option<QueuedJob>, BrokerError> {
        let url = self.endpoint(&format!("lanes/{}/jobs/next", lane.as_str()));
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|error| BrokerError::Unavailable(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::UnexpectedStatus { status, body });
        }
        let job: QueuedJob = response
            .json()
            .await
            .map_err(|error| BrokerError::Unavailable(error.to_string()))?;
        Ok(Some(job))
    }

    async fn backlog(&self, lane: Lane) -> Result<usize, BrokerError> {
        let url = self.endpoint(&format!("lanes/{}/backlog", lane.as_str()));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|error| BrokerError::Unavailable(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::UnexpectedStatus { status, body });
        }
        let parsed: BacklogResponse = response
            .json()
            .await
            .map_err(|error| BrokerError::Unavailable(error.to_string()))?;
        Ok(parsed.depth)
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        let response = self
            .http
            .get(self.endpoint("health"))
            .send()
            .await
            .map_err(|error| BrokerError::Unavailable(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::UnexpectedStatus { status, body });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, Method::POST, MockServer};

    fn job(lane: Lane) -> QueuedJob {
        QueuedJob {
            job_id: Uuid::new_v4(),
            lane,
            payload_ref: "runs/doc.txt".to_string(),
            realm: None,
        }
    }

    #[tokio::test]
    async fn lanes_are_isolated_queues() {
        let broker = InProcessBroker::new();
        broker.enqueue(job(Lane::Urgent)).await.unwrap();
        broker.enqueue(job(Lane::Slow)).await.unwrap();

        assert!(broker.dequeue(Lane::Default).await.unwrap().is_none());
        assert!(broker.dequeue(Lane::Urgent).await.unwrap().is_some());
        assert!(broker.dequeue(Lane::Urgent).await.unwrap().is_none());
        assert!(broker.dequeue(Lane::Slow).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn backlog_tracks_queued_jobs() {
        let broker = InProcessBroker::new();
        assert_eq!(broker.backlog(Lane::Default).await.unwrap(), 0);
        broker.enqueue(job(Lane::Default)).await.unwrap();
        broker.enqueue(job(Lane::Default)).await.unwrap();
        assert_eq!(broker.backlog(Lane::Default).await.unwrap(), 2);
        broker.dequeue(Lane::Default).await.unwrap();
        assert_eq!(broker.backlog(Lane::Default).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn full_lane_is_reported() {
        let broker = InProcessBroker::with_capacity(1);
        broker.enqueue(job(Lane::Urgent)).await.unwrap();
        let error = broker.enqueue(job(Lane::Urgent)).await.unwrap_err();
        assert!(matches!(error, BrokerError::Full { lane: "urgent" }));
    }

    #[tokio::test]
    async fn http_broker_round_trips_enqueue_and_dequeue() {
        let server = MockServer::start_async().await;
        let queued = job(Lane::Default);
        let enqueue_mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/lanes/default/jobs");
                then.status(202);
            })
            .await;
        let body = serde_json::to_value(&queued).unwrap();
        let dequeue_mock = server
            .mock_async(move |when, then| {
                when.method(POST).path("/lanes/default/jobs/next");
                then.status(200).json_body(body);
            })
            .await;

        let broker = HttpBroker::new(server.base_url());
        broker.enqueue(queued.clone()).await.unwrap();
        let next = broker.dequeue(Lane::Default).await.unwrap().unwrap();
        assert_eq!(next.job_id, queued.job_id);
        enqueue_mock.assert_async().await;
        dequeue_mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_broker_empty_lane_is_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/lanes/urgent/jobs/next");
                then.status(204);
            })
            .await;

        let broker = HttpBroker::new(server.base_url());
        assert!(broker.dequeue(Lane::Urgent).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn http_broker_backlog_and_ping() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/lanes/slow/backlog");
                then.status(200).json_body(serde_json::json!({"depth": 7}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/health");
                then.status(200);
            })
            .await;

        let broker = HttpBroker::new(server.base_url());
        assert_eq!(broker.backlog(Lane::Slow).await.unwrap(), 7);
        broker.ping().await.unwrap();
    }
}
