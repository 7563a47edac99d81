//! Task data model - the unit of executable work
//!
//! A task couples a unique id with either a local async operation or an
//! external job declaration, plus its ordered input bindings. Identity is
//! fixed at registration; only the runner mutates per-run state, and it does
//! so in the RunRecord, never on the task itself.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{Result, WeirError};
use crate::job::{JobRequest, JobService, TrackerConfig};

/// Valid task ids: alphanumeric start, then alphanumerics, '-' and '_'
static TASK_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap());

/// Validate a task id against the id grammar
pub(crate) fn validate_task_id(id: &str) -> Result<()> {
    if TASK_ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(WeirError::InvalidTaskId { id: id.to_string() })
    }
}

// ============================================================================
// INPUTS
// ============================================================================

/// A single input binding: a literal value, or another task's output
#[derive(Debug, Clone)]
pub enum Input {
    /// Passed through unchanged
    Literal(Value),
    /// Resolved from the producing task's recorded output at dispatch time.
    /// Also adds an implicit edge (producer → consumer) at build time.
    TaskOutput(Arc<str>),
}

impl Input {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Bind to a registered task's output via its handle
    pub fn output(handle: &TaskHandle) -> Self {
        Self::TaskOutput(Arc::clone(&handle.id))
    }

    /// Bind to a task's output by id (validated at build time)
    pub fn output_of(task_id: &str) -> Self {
        Self::TaskOutput(Arc::from(task_id))
    }
}

/// Resolved input values handed to a task operation, in declaration order
#[derive(Debug, Clone, Default)]
pub struct TaskInputs {
    values: Vec<Arc<Value>>,
}

impl TaskInputs {
    pub fn new(values: Vec<Arc<Value>>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().map(Arc::as_ref)
    }
}

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Per-task retry policy: re-run a failed operation before marking it
/// terminal. Retries are exhausted before failure propagates downstream.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry attempts after the initial one
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Total attempts including the initial one
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

// ============================================================================
// TASK
// ============================================================================

/// Boxed async operation: resolved inputs in, JSON value out
pub type TaskOp = Box<dyn Fn(TaskInputs) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// What a task executes
pub enum TaskKind {
    /// Runs in-process under a worker-pool permit
    Local { op: TaskOp },
    /// Submitted to an external system and tracked via polling.
    /// Polling holds no worker-pool permit.
    ExternalJob {
        service: Arc<dyn JobService>,
        request: JobRequest,
        tracker: TrackerConfig,
    },
}

impl std::fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { .. } => f.debug_struct("Local").finish_non_exhaustive(),
            Self::ExternalJob {
                service, request, ..
            } => f
                .debug_struct("ExternalJob")
                .field("service", &service.name())
                .field("request", request)
                .finish_non_exhaustive(),
        }
    }
}

/// A registered task. Identity is immutable after registration.
#[derive(Debug)]
pub struct Task {
    pub id: Arc<str>,
    pub kind: TaskKind,
    pub inputs: Vec<Input>,
    pub retry: Option<RetryPolicy>,
}

impl Task {
    pub fn is_external(&self) -> bool {
        matches!(self.kind, TaskKind::ExternalJob { .. })
    }
}

/// Typed reference to a registered task, returned by `FlowBuilder::add_task`
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub(crate) id: Arc<str>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

// ============================================================================
// TASK DEFINITION BUILDER
// ============================================================================

/// Declaration of a task, consumed by `FlowBuilder::add_task`
pub struct TaskDef {
    pub(crate) id: String,
    pub(crate) kind: TaskKind,
    pub(crate) inputs: Vec<Input>,
    pub(crate) retry: Option<RetryPolicy>,
}

impl TaskDef {
    /// Declare a local task wrapping an async operation
    pub fn new<F, Fut>(id: impl Into<String>, op: F) -> Self
    where
        F: Fn(TaskInputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            id: id.into(),
            kind: TaskKind::Local {
                op: Box::new(move |inputs| Box::pin(op(inputs))),
            },
            inputs: Vec::new(),
            retry: None,
        }
    }

    /// Declare a task that submits a job to an external system and tracks
    /// it to completion. Its output is the serialized job handle, so
    /// downstream ordering normally comes from explicit edges.
    pub fn external(
        id: impl Into<String>,
        service: Arc<dyn JobService>,
        request: JobRequest,
    ) -> Self {
        Self {
            id: id.into(),
            kind: TaskKind::ExternalJob {
                service,
                request,
                tracker: TrackerConfig::default(),
            },
            inputs: Vec::new(),
            retry: None,
        }
    }

    /// Append an input binding (declaration order is preserved)
    pub fn input(mut self, input: Input) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Override the poll interval (external tasks only; ignored otherwise)
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        if let TaskKind::ExternalJob { tracker, .. } = &mut self.kind {
            tracker.poll_interval = interval;
        }
        self
    }

    /// Override the poll timeout (external tasks only; ignored otherwise)
    pub fn timeout(mut self, timeout: Duration) -> Self {
        if let TaskKind::ExternalJob { tracker, .. } = &mut self.kind {
            tracker.timeout = timeout;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_task_ids() {
        for id in ["get_config", "run-now", "task1", "A", "0warm"] {
            assert!(validate_task_id(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn invalid_task_ids() {
        for id in ["", "task with spaces", "-leading", "_leading", "über", "a.b"] {
            assert!(validate_task_id(id).is_err(), "{id} should be invalid");
        }
    }

    #[test]
    fn input_constructors() {
        let lit = Input::literal(json!({"env": "prod"}));
        assert!(matches!(lit, Input::Literal(_)));

        let by_name = Input::output_of("get_config");
        match by_name {
            Input::TaskOutput(id) => assert_eq!(&*id, "get_config"),
            _ => panic!("expected TaskOutput"),
        }
    }

    #[test]
    fn task_inputs_ordered_access() {
        let inputs = TaskInputs::new(vec![
            Arc::new(json!("first")),
            Arc::new(json!({"n": 2})),
        ]);
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs.get(0), Some(&json!("first")));
        assert_eq!(inputs.get(1).unwrap()["n"], 2);
        assert!(inputs.get(2).is_none());
    }

    #[test]
    fn retry_policy_builder() {
        let policy = RetryPolicy::default()
            .with_max_retries(5)
            .with_backoff(Duration::from_millis(50));
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff, Duration::from_millis(50));
        assert_eq!(policy.total_attempts(), 6);
    }

    #[test]
    fn task_def_collects_inputs_in_order() {
        let def = TaskDef::new("t", |_inputs| async { Ok(json!(null)) })
            .input(Input::literal(1))
            .input(Input::output_of("a"))
            .input(Input::literal(3));
        assert_eq!(def.inputs.len(), 3);
        assert!(matches!(def.inputs[0], Input::Literal(_)));
        assert!(matches!(def.inputs[1], Input::TaskOutput(_)));
    }
}
