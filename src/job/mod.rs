//! External job tracking - submit + poll against an asynchronous system
//!
//! Some tasks do not compute a result locally: they trigger work in a
//! remote job runner and only ever see an opaque job identifier. The
//! tracker performs a single submit, then polls the collaborator on a
//! fixed interval until it reports a terminal status, a configured timeout
//! elapses, or the run is cancelled. The core never assumes synchronous
//! completion.

mod http;
mod mock;

pub use http::HttpJobService;
pub use mock::MockJobService;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{Result, WeirError};
use crate::event_log::{EventKind, EventLog};
use crate::state::JobState;

// ============================================================================
// COLLABORATOR CONTRACT
// ============================================================================

/// Opaque identifier minted by the external system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Arc<str>);

impl JobId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What gets submitted to the external system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Human-readable job name
    pub name: String,
    /// Collaborator-specific job specification
    pub payload: Value,
}

impl JobRequest {
    pub fn new(name: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

/// Status as reported by the external system on a poll
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed { reason: String },
}

/// The collaborator contract: submit a job spec, poll its status, and
/// optionally cancel. Transport, persistence, and authentication are the
/// implementation's concern.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Service name for diagnostics
    fn name(&self) -> &str;

    /// Submit a job, returning its external identifier
    async fn submit(&self, request: &JobRequest) -> Result<JobId>;

    /// Query the current status of a submitted job
    async fn poll(&self, job_id: &JobId) -> Result<JobStatus>;

    /// Best-effort cancellation; implementations may leave this a no-op
    async fn cancel(&self, _job_id: &JobId) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// JOB HANDLE
// ============================================================================

/// Returned by a job-submitting task: the opaque external identifier plus
/// the last observed status. This is the task's entire output, so
/// downstream ordering for such tasks relies on explicit edges rather than
/// data-dependency inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalJobHandle {
    pub job_id: JobId,
    pub status: JobState,
}

impl ExternalJobHandle {
    /// Serialize for storage as a task output value
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ============================================================================
// TRACKER
// ============================================================================

/// Poll loop configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Fixed interval between status queries
    pub poll_interval: Duration,
    /// Give up once the job has not reached a terminal status for this long
    pub timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(3600),
        }
    }
}

impl TrackerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Drives one external job from submission to terminal status.
///
/// The poll loop suspends only this task's future: waits go through
/// `tokio::select!` over the run's cancellation token and a timer, never
/// a worker-pool permit.
pub struct JobTracker {
    service: Arc<dyn JobService>,
    config: TrackerConfig,
}

impl JobTracker {
    pub fn new(service: Arc<dyn JobService>, config: TrackerConfig) -> Self {
        Self { service, config }
    }

    /// Submit once, then poll to a terminal state.
    ///
    /// Returns the job handle on external success. External failure,
    /// timeout, and run cancellation map to `ExternalJob`, `PollTimeout`,
    /// and `RunCancelled` respectively; on cancellation at most one
    /// best-effort cancel call goes out to the external system.
    #[instrument(skip_all, fields(task_id = %task_id, service = self.service.name()))]
    pub async fn track(
        &self,
        task_id: &Arc<str>,
        request: &JobRequest,
        events: &EventLog,
        cancel: &CancellationToken,
    ) -> Result<ExternalJobHandle> {
        let job_id = self.service.submit(request).await?;
        debug!(job_id = %job_id, "job submitted");
        events.emit(EventKind::JobSubmitted {
            task_id: Arc::clone(task_id),
            job_id: job_id.to_string(),
        });

        let deadline = Instant::now() + self.config.timeout;

        loop {
            // Wake at the next poll tick, but never sleep past the deadline
            let wake = Instant::now() + self.config.poll_interval;
            let wake = if wake > deadline { deadline } else { wake };

            tokio::select! {
                _ = cancel.cancelled() => {
                    events.emit(EventKind::JobCancelRequested {
                        task_id: Arc::clone(task_id),
                        job_id: job_id.to_string(),
                    });
                    if let Err(err) = self.service.cancel(&job_id).await {
                        warn!(job_id = %job_id, error = %err, "best-effort job cancel failed");
                    }
                    return Err(WeirError::RunCancelled);
                }
                _ = tokio::time::sleep_until(wake) => {}
            }

            if Instant::now() >= deadline {
                return Err(WeirError::PollTimeout {
                    job_id: job_id.to_string(),
                    timeout_ms: self.config.timeout.as_millis() as u64,
                });
            }

            let status = self.service.poll(&job_id).await?;
            let observed = match &status {
                JobStatus::Running => JobState::Polling,
                JobStatus::Succeeded => JobState::Succeeded,
                JobStatus::Failed { .. } => JobState::Failed,
            };
            debug!(job_id = %job_id, status = %observed, "job polled");
            events.emit(EventKind::JobPolled {
                task_id: Arc::clone(task_id),
                job_id: job_id.to_string(),
                status: observed,
            });

            match status {
                JobStatus::Running => continue,
                JobStatus::Succeeded => {
                    return Ok(ExternalJobHandle {
                        job_id,
                        status: JobState::Succeeded,
                    })
                }
                JobStatus::Failed { reason } => {
                    return Err(WeirError::ExternalJob {
                        job_id: job_id.to_string(),
                        detail: reason,
                    })
                }
            }
        }
    }
}
