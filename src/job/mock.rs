//! Mock job service for testing
//!
//! Scripted submit ids and poll statuses without a real external system.
//! Essential for unit tests and CI pipelines.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{JobId, JobRequest, JobService, JobStatus};
use crate::error::{Result, WeirError};

/// Mock service returning predefined statuses
pub struct MockJobService {
    /// Queue of poll statuses to return (FIFO)
    statuses: Mutex<VecDeque<JobStatus>>,
    /// Status returned once the queue is empty
    default_status: JobStatus,
    /// Fixed job id for the next submit (sequential "job-N" otherwise)
    next_job_id: Mutex<Option<String>>,
    /// Forces the next submit call to fail with this reason
    submit_failure: Mutex<Option<String>>,
    seq: AtomicU64,
    /// Recorded calls (for assertions)
    submits: Mutex<Vec<JobRequest>>,
    polls: Mutex<Vec<JobId>>,
    cancels: Mutex<Vec<JobId>>,
}

impl MockJobService {
    /// Create a mock that reports Running forever
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(VecDeque::new()),
            default_status: JobStatus::Running,
            next_job_id: Mutex::new(None),
            submit_failure: Mutex::new(None),
            seq: AtomicU64::new(0),
            submits: Mutex::new(Vec::new()),
            polls: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
        }
    }

    /// Script the poll status sequence (FIFO)
    pub fn with_statuses(self, statuses: Vec<JobStatus>) -> Self {
        *self.statuses.lock() = statuses.into();
        self
    }

    /// Set the status returned after the queue drains
    pub fn with_default_status(mut self, status: JobStatus) -> Self {
        self.default_status = status;
        self
    }

    /// Fix the job id returned by the next submit
    pub fn with_job_id(self, job_id: impl Into<String>) -> Self {
        *self.next_job_id.lock() = Some(job_id.into());
        self
    }

    /// Make the next submit call fail
    pub fn fail_next_submit(self, reason: impl Into<String>) -> Self {
        *self.submit_failure.lock() = Some(reason.into());
        self
    }

    /// Append a status to the queue after construction
    pub fn queue_status(&self, status: JobStatus) {
        self.statuses.lock().push_back(status);
    }

    /// Requests submitted so far
    pub fn submits(&self) -> Vec<JobRequest> {
        self.submits.lock().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submits.lock().len()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.lock().len()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.lock().len()
    }

    /// Job ids that received a cancel call
    pub fn cancelled_jobs(&self) -> Vec<JobId> {
        self.cancels.lock().clone()
    }
}

impl Default for MockJobService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobService for MockJobService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, request: &JobRequest) -> Result<JobId> {
        if let Some(reason) = self.submit_failure.lock().take() {
            return Err(WeirError::JobSubmit {
                service: "mock".to_string(),
                reason,
            });
        }

        self.submits.lock().push(request.clone());

        let id = self.next_job_id.lock().take().unwrap_or_else(|| {
            format!("job-{}", self.seq.fetch_add(1, Ordering::SeqCst))
        });
        Ok(JobId::new(id))
    }

    async fn poll(&self, job_id: &JobId) -> Result<JobStatus> {
        self.polls.lock().push(job_id.clone());

        let status = self
            .statuses
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_status.clone());
        Ok(status)
    }

    async fn cancel(&self, job_id: &JobId) -> Result<()> {
        self.cancels.lock().push(job_id.clone());
        Ok(())
    }
}
