//! RunRecord - per-run task state and result storage
//!
//! One record per flow execution. Lock-free concurrent map with a single
//! writer per key (the future executing that task); readers get consistent
//! snapshots for readiness checks. Terminal entries are write-once: a
//! recorded Success/Failed/Skipped is never overwritten, and transitions
//! only move forward.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;

use crate::state::TaskState;

/// Everything recorded about one task within a run
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub state: TaskState,
    /// Produced once, read-only afterwards (O(1) clones via Arc)
    pub output: Option<Arc<Value>>,
    /// Failure detail when state is Failed
    pub error: Option<String>,
    /// Nearest failed/skipped upstream (or "cancelled") when state is Skipped
    pub skip_cause: Option<String>,
    /// Executions performed (0 while pending/skipped)
    pub attempts: u32,
    /// Offsets in ms from run start
    pub started_ms: Option<u64>,
    pub ended_ms: Option<u64>,
}

impl TaskRecord {
    fn pending() -> Self {
        Self {
            state: TaskState::Pending,
            output: None,
            error: None,
            skip_cause: None,
            attempts: 0,
            started_ms: None,
            ended_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_success(&self) -> bool {
        self.state == TaskState::Success
    }
}

/// Thread-safe storage for one run's task records
#[derive(Clone, Default)]
pub struct RunRecord {
    records: Arc<DashMap<Arc<str>, TaskRecord>>,
    started: Option<Instant>,
}

impl RunRecord {
    /// Create a record clocked from now
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            started: Some(Instant::now()),
        }
    }

    fn now_ms(&self) -> u64 {
        self.started
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    /// Current state of a task (Pending if nothing recorded yet)
    pub fn state(&self, task_id: &str) -> TaskState {
        self.records
            .get(task_id)
            .map(|r| r.state)
            .unwrap_or(TaskState::Pending)
    }

    pub fn is_terminal(&self, task_id: &str) -> bool {
        self.state(task_id).is_terminal()
    }

    pub fn is_success(&self, task_id: &str) -> bool {
        self.state(task_id) == TaskState::Success
    }

    /// Snapshot of a task's record
    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.records.get(task_id).map(|r| r.value().clone())
    }

    /// The recorded output value (None unless Success)
    pub fn output(&self, task_id: &str) -> Option<Arc<Value>> {
        self.records
            .get(task_id)
            .and_then(|r| r.output.as_ref().map(Arc::clone))
    }

    /// Pending → Running. First attempt stamps the start offset.
    pub fn mark_running(&self, task_id: Arc<str>) {
        let now = self.now_ms();
        let mut entry = self.records.entry(task_id).or_insert_with(TaskRecord::pending);
        if !entry.state.can_transition(TaskState::Running) {
            warn!(task_id = %entry.key(), state = %entry.state, "ignoring invalid transition to running");
            return;
        }
        entry.state = TaskState::Running;
        entry.attempts += 1;
        if entry.started_ms.is_none() {
            entry.started_ms = Some(now);
        }
    }

    /// Count a retry attempt without re-entering Running
    pub fn bump_attempt(&self, task_id: &str) {
        if let Some(mut entry) = self.records.get_mut(task_id) {
            entry.attempts += 1;
        }
    }

    /// Running → Success (write-once)
    pub fn record_success(&self, task_id: Arc<str>, output: Arc<Value>) {
        let now = self.now_ms();
        let mut entry = self.records.entry(task_id).or_insert_with(TaskRecord::pending);
        if entry.is_terminal() {
            warn!(task_id = %entry.key(), "terminal record is write-once; dropping success");
            return;
        }
        entry.state = TaskState::Success;
        entry.output = Some(output);
        entry.ended_ms = Some(now);
    }

    /// Running → Failed (write-once)
    pub fn record_failure(&self, task_id: Arc<str>, error: impl Into<String>) {
        let now = self.now_ms();
        let mut entry = self.records.entry(task_id).or_insert_with(TaskRecord::pending);
        if entry.is_terminal() {
            warn!(task_id = %entry.key(), "terminal record is write-once; dropping failure");
            return;
        }
        entry.state = TaskState::Failed;
        entry.error = Some(error.into());
        entry.ended_ms = Some(now);
    }

    /// Pending → Skipped with its cause (write-once)
    pub fn record_skipped(&self, task_id: Arc<str>, cause: impl Into<String>) {
        let now = self.now_ms();
        let mut entry = self.records.entry(task_id).or_insert_with(TaskRecord::pending);
        if entry.is_terminal() {
            warn!(task_id = %entry.key(), "terminal record is write-once; dropping skip");
            return;
        }
        entry.state = TaskState::Skipped;
        entry.skip_cause = Some(cause.into());
        entry.ended_ms = Some(now);
    }

    /// Ids with recorded entries (terminal or running)
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Aggregate counts over the given task set
    pub fn summary<'a>(&self, task_ids: impl Iterator<Item = &'a str>) -> RunSummary {
        let mut summary = RunSummary::default();
        for id in task_ids {
            match self.state(id) {
                TaskState::Success => summary.succeeded += 1,
                TaskState::Failed => summary.failed += 1,
                TaskState::Skipped => summary.skipped += 1,
                TaskState::Pending | TaskState::Running => summary.unfinished += 1,
            }
        }
        summary
    }
}

impl std::fmt::Debug for RunRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRecord")
            .field("tasks", &self.records.len())
            .finish()
    }
}

/// Aggregate task counts for a finished (or cancelled) run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub unfinished: usize,
}

/// Overall result of a flow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowOutcome {
    /// Every task ended Success
    Success,
    /// At least one task ended Failed
    Failed,
    /// The run was cancelled before completion
    Cancelled,
}

/// Returned by `Runner::run`: outcome plus the full per-task record
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub flow: Arc<str>,
    pub outcome: FlowOutcome,
    pub record: RunRecord,
    pub summary: RunSummary,
    pub total_duration: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome == FlowOutcome::Success
    }
}
