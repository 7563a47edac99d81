//! Flow Runner - DAG execution over a bounded worker pool
//!
//! Dispatch is event-driven: the ready set is re-evaluated after every task
//! completion, so siblings start as soon as their own dependencies are
//! terminal (no wave barrier). Local operations hold a semaphore permit
//! while they run; external-job tasks poll without one, so a long poll
//! never starves the pool.
//!
//! Failure propagation: a failed task skips its transitive downstream in
//! topological order, and independent branches keep executing. The full
//! per-task RunRecord comes back regardless of outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, WeirError};
use crate::event_log::{EventKind, EventLog};
use crate::flow::Flow;
use crate::job::JobTracker;
use crate::record::{FlowOutcome, RunRecord, RunReport};
use crate::state::TaskState;
use crate::task::{Input, RetryPolicy, Task, TaskInputs, TaskKind};

// ============================================================================
// CONFIG
// ============================================================================

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Worker-pool bound on simultaneously executing local operations
    pub max_concurrent_tasks: usize,
    /// Cancel the run on the first terminal task failure
    pub fail_fast: bool,
    /// Applied to tasks that declare no retry policy of their own
    pub default_retry: Option<RetryPolicy>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            fail_fast: false,
            default_retry: None,
        }
    }
}

impl RunConfig {
    pub fn with_max_concurrent_tasks(mut self, limit: usize) -> Self {
        self.max_concurrent_tasks = limit.max(1);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = Some(policy);
        self
    }
}

// ============================================================================
// RUNNER
// ============================================================================

/// Executes a flow and returns the run's full record
pub struct Runner {
    flow: Arc<Flow>,
    config: RunConfig,
    events: EventLog,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(flow: Flow) -> Self {
        Self {
            flow: Arc::new(flow),
            config: RunConfig::default(),
            events: EventLog::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// The run's event log (live during execution)
    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    /// Token that cancels the run when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the run: stop dispatching, let mid-poll tasks issue their
    /// best-effort external cancel, then mark non-terminal tasks Skipped
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Main execution loop
    #[instrument(skip(self), fields(flow = %self.flow.name(), tasks = self.flow.len()))]
    pub async fn run(&self) -> Result<RunReport> {
        let run_start = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let record = RunRecord::new();

        info!(run_id = %run_id, "starting flow run");
        self.events.emit(EventKind::RunStarted {
            run_id: run_id.clone(),
            flow: self.flow.name_arc(),
            task_count: self.flow.len(),
        });

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_tasks));
        let mut join_set: JoinSet<(Arc<str>, TaskState)> = JoinSet::new();
        let mut dispatched: FxHashSet<Arc<str>> = FxHashSet::default();
        let mut cancelled = false;

        loop {
            if !cancelled && self.cancel.is_cancelled() {
                cancelled = true;
                self.events.emit(EventKind::RunCancelled);
                info!("run cancelled; draining in-flight tasks");
            }

            if !cancelled {
                self.propagate_skips(&record);
                self.dispatch_ready(&record, &semaphore, &mut join_set, &mut dispatched);
            }

            if join_set.is_empty() {
                if cancelled || self.all_terminal(&record) {
                    break;
                }
                // Valid DAGs cannot get here; structural backstop
                let error = WeirError::Deadlock;
                self.events.emit(EventKind::RunFailed {
                    error: error.to_string(),
                });
                return Err(error);
            }

            tokio::select! {
                _ = self.cancel.cancelled(), if !cancelled => {}
                joined = join_set.join_next() => match joined {
                    Some(Ok((task_id, state))) => {
                        debug!(task_id = %task_id, state = %state, "task settled");
                        if state == TaskState::Failed && self.config.fail_fast {
                            warn!(task_id = %task_id, "fail-fast: cancelling run");
                            self.cancel.cancel();
                        }
                    }
                    Some(Err(join_err)) => {
                        let error = format!("task panicked: {join_err}");
                        self.events.emit(EventKind::RunFailed { error: error.clone() });
                        return Err(WeirError::TaskFailed {
                            task_id: "<unknown>".to_string(),
                            reason: error,
                        });
                    }
                    None => {}
                },
            }
        }

        // Cancellation path: whatever never reached a terminal state is skipped
        for task in self.flow.tasks() {
            if !record.is_terminal(&task.id) {
                record.record_skipped(Arc::clone(&task.id), "cancelled");
                self.events.emit(EventKind::TaskSkipped {
                    task_id: Arc::clone(&task.id),
                    cause: "cancelled".to_string(),
                });
            }
        }

        let summary = record.summary(self.flow.tasks().iter().map(|t| t.id.as_ref()));
        let outcome = if summary.failed > 0 {
            FlowOutcome::Failed
        } else if cancelled {
            FlowOutcome::Cancelled
        } else {
            FlowOutcome::Success
        };

        let total_duration = run_start.elapsed();
        self.events.emit(EventKind::RunCompleted {
            outcome,
            total_duration_ms: total_duration.as_millis() as u64,
        });
        info!(
            run_id = %run_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "flow run finished"
        );

        Ok(RunReport {
            run_id,
            flow: self.flow.name_arc(),
            outcome,
            record,
            summary,
            total_duration,
        })
    }

    /// Skip every pending task with a failed or skipped upstream. One pass
    /// in topological order settles the transitive closure.
    fn propagate_skips(&self, record: &RunRecord) {
        for id in self.flow.topological_order() {
            if record.state(id) != TaskState::Pending {
                continue;
            }
            let blocked_by = self
                .flow
                .graph()
                .dependencies(id)
                .iter()
                .find(|dep| {
                    matches!(
                        record.state(dep),
                        TaskState::Failed | TaskState::Skipped
                    )
                })
                .map(|dep| dep.to_string());

            if let Some(cause) = blocked_by {
                debug!(task_id = %id, cause = %cause, "skipping task: broken upstream chain");
                record.record_skipped(Arc::clone(id), cause.clone());
                self.events.emit(EventKind::TaskSkipped {
                    task_id: Arc::clone(id),
                    cause,
                });
            }
        }
    }

    /// Spawn every pending task whose upstream tasks all succeeded
    fn dispatch_ready(
        &self,
        record: &RunRecord,
        semaphore: &Arc<Semaphore>,
        join_set: &mut JoinSet<(Arc<str>, TaskState)>,
        dispatched: &mut FxHashSet<Arc<str>>,
    ) {
        for task in self.flow.tasks() {
            if dispatched.contains(&task.id) || record.state(&task.id) != TaskState::Pending {
                continue;
            }

            let deps = self.flow.graph().dependencies(&task.id);
            if !deps.iter().all(|dep| record.is_success(dep)) {
                continue;
            }

            dispatched.insert(Arc::clone(&task.id));
            self.events.emit(EventKind::TaskScheduled {
                task_id: Arc::clone(&task.id),
                dependencies: deps.to_vec(),
            });
            debug!(task_id = %task.id, "dispatching task");

            join_set.spawn(execute_task(
                Arc::clone(task),
                record.clone(),
                self.events.clone(),
                Arc::clone(semaphore),
                self.cancel.clone(),
                self.config.default_retry.clone(),
            ));
        }
    }

    fn all_terminal(&self, record: &RunRecord) -> bool {
        self.flow.tasks().iter().all(|t| record.is_terminal(&t.id))
    }
}

// ============================================================================
// TASK EXECUTION
// ============================================================================

/// Resolve input bindings immediately before execution. Literal inputs
/// pass through unchanged; referenced inputs are read-only views of the
/// producing task's recorded output.
fn resolve_inputs(task: &Task, record: &RunRecord) -> Result<TaskInputs> {
    let mut values = Vec::with_capacity(task.inputs.len());
    for input in &task.inputs {
        match input {
            Input::Literal(value) => values.push(Arc::new(value.clone())),
            Input::TaskOutput(source) => values.push(record.output(source).ok_or_else(|| {
                WeirError::MissingOutput {
                    task_id: source.to_string(),
                }
            })?),
        }
    }
    Ok(TaskInputs::new(values))
}

/// Run one task to a terminal state, retrying per its policy.
///
/// Every record/event write for this task happens here, on the single
/// future executing it.
async fn execute_task(
    task: Arc<Task>,
    record: RunRecord,
    events: EventLog,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    default_retry: Option<RetryPolicy>,
) -> (Arc<str>, TaskState) {
    let task_id = Arc::clone(&task.id);
    let start = Instant::now();

    record.mark_running(Arc::clone(&task_id));

    let inputs = match resolve_inputs(&task, &record) {
        Ok(inputs) => inputs,
        Err(err) => {
            let reason = err.to_string();
            record.record_failure(Arc::clone(&task_id), reason.clone());
            events.emit(EventKind::TaskFailed {
                task_id: Arc::clone(&task_id),
                error: reason,
                duration_ms: 0,
            });
            return (task_id, TaskState::Failed);
        }
    };

    let retry = task.retry.clone().or(default_retry);
    let (max_retries, backoff) = retry
        .map(|r| (r.max_retries, r.backoff))
        .unwrap_or((0, Duration::ZERO));
    let total_attempts = max_retries + 1;

    let mut last_error = String::new();
    for attempt in 1..=total_attempts {
        if attempt > 1 {
            record.bump_attempt(&task_id);
        }
        events.emit(EventKind::TaskStarted {
            task_id: Arc::clone(&task_id),
            attempt,
        });

        let result: Result<Value> = match &task.kind {
            TaskKind::Local { op } => {
                // Permit held only while the operation itself runs
                tokio::select! {
                    _ = cancel.cancelled() => Err(WeirError::RunCancelled),
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(_permit) => op(inputs.clone()).await,
                        Err(_) => Err(WeirError::RunCancelled),
                    },
                }
            }
            TaskKind::ExternalJob {
                service,
                request,
                tracker,
            } => JobTracker::new(Arc::clone(service), tracker.clone())
                .track(&task_id, request, &events, &cancel)
                .await
                .map(|handle| handle.to_value()),
        };

        match result {
            Ok(value) => {
                let output = Arc::new(value);
                record.record_success(Arc::clone(&task_id), Arc::clone(&output));
                events.emit(EventKind::TaskCompleted {
                    task_id: Arc::clone(&task_id),
                    output,
                    duration_ms: start.elapsed().as_millis() as u64,
                });
                return (task_id, TaskState::Success);
            }
            Err(WeirError::RunCancelled) => {
                record.record_skipped(Arc::clone(&task_id), "cancelled");
                events.emit(EventKind::TaskSkipped {
                    task_id: Arc::clone(&task_id),
                    cause: "cancelled".to_string(),
                });
                return (task_id, TaskState::Skipped);
            }
            Err(err) => {
                last_error = err.to_string();
                warn!(task_id = %task_id, attempt, error = %last_error, "task attempt failed");

                if attempt < total_attempts {
                    events.emit(EventKind::TaskRetrying {
                        task_id: Arc::clone(&task_id),
                        attempt,
                        delay_ms: backoff.as_millis() as u64,
                        error: last_error.clone(),
                    });
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            record.record_skipped(Arc::clone(&task_id), "cancelled");
                            events.emit(EventKind::TaskSkipped {
                                task_id: Arc::clone(&task_id),
                                cause: "cancelled".to_string(),
                            });
                            return (task_id, TaskState::Skipped);
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    // Retry budget spent: wrap the last failure before propagating
    let reason = if max_retries > 0 {
        WeirError::RetryExhausted {
            task_id: task_id.to_string(),
            attempts: total_attempts,
            last_error,
        }
        .to_string()
    } else {
        last_error
    };

    record.record_failure(Arc::clone(&task_id), reason.clone());
    events.emit(EventKind::TaskFailed {
        task_id: Arc::clone(&task_id),
        error: reason,
        duration_ms: start.elapsed().as_millis() as u64,
    });
    (task_id, TaskState::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowBuilder;
    use crate::task::TaskDef;
    use serde_json::json;

    fn echo(id: &str, value: Value) -> TaskDef {
        TaskDef::new(id, move |_inputs| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    fn failing(id: &str, reason: &str) -> TaskDef {
        let reason = reason.to_string();
        TaskDef::new(id, move |_inputs| {
            let reason = reason.clone();
            async move {
                Err(WeirError::TaskFailed {
                    task_id: "inner".to_string(),
                    reason,
                })
            }
        })
    }

    #[tokio::test]
    async fn single_task_flow_succeeds() {
        let mut b = FlowBuilder::new("single");
        b.add_task(echo("only", json!("done"))).unwrap();
        let report = Runner::new(b.build().unwrap()).run().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.summary.succeeded, 1);
        assert_eq!(*report.record.output("only").unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn failed_task_fails_flow_but_returns_record() {
        let mut b = FlowBuilder::new("failing");
        b.add_task(failing("boom", "nope")).unwrap();
        b.add_task(echo("fine", json!(1))).unwrap();

        let report = Runner::new(b.build().unwrap()).run().await.unwrap();
        assert_eq!(report.outcome, FlowOutcome::Failed);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.succeeded, 1);
        assert!(report
            .record
            .get("boom")
            .unwrap()
            .error
            .unwrap()
            .contains("nope"));
    }

    #[tokio::test]
    async fn input_resolution_feeds_downstream() {
        let mut b = FlowBuilder::new("wire");
        let producer = b.add_task(echo("producer", json!({"n": 21}))).unwrap();
        b.add_task(
            TaskDef::new("doubler", |inputs: TaskInputs| async move {
                let n = inputs.get(0).and_then(|v| v["n"].as_i64()).unwrap_or(0);
                Ok(json!(n * 2))
            })
            .input(Input::output(&producer)),
        )
        .unwrap();

        let report = Runner::new(b.build().unwrap()).run().await.unwrap();
        assert_eq!(*report.record.output("doubler").unwrap(), json!(42));
    }

    #[tokio::test]
    async fn literal_inputs_pass_through() {
        let mut b = FlowBuilder::new("literal");
        b.add_task(
            TaskDef::new("concat", |inputs: TaskInputs| async move {
                let joined: Vec<String> = inputs
                    .iter()
                    .map(|v| v.as_str().unwrap_or_default().to_string())
                    .collect();
                Ok(json!(joined.join("-")))
            })
            .input(Input::literal("a"))
            .input(Input::literal("b")),
        )
        .unwrap();

        let report = Runner::new(b.build().unwrap()).run().await.unwrap();
        assert_eq!(*report.record.output("concat").unwrap(), json!("a-b"));
    }

    #[tokio::test]
    async fn retry_then_succeed() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut b = FlowBuilder::new("retry");
        b.add_task(
            TaskDef::new("flaky", move |_inputs| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(WeirError::TaskFailed {
                            task_id: "flaky".to_string(),
                            reason: "transient".to_string(),
                        })
                    } else {
                        Ok(json!("recovered"))
                    }
                }
            })
            .retry(RetryPolicy::new(3, Duration::from_millis(1))),
        )
        .unwrap();

        let report = Runner::new(b.build().unwrap()).run().await.unwrap();
        assert!(report.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.record.get("flaky").unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_wraps_last_error() {
        let mut b = FlowBuilder::new("exhaust");
        b.add_task(
            failing("hopeless", "always broken")
                .retry(RetryPolicy::new(2, Duration::from_millis(1))),
        )
        .unwrap();

        let report = Runner::new(b.build().unwrap()).run().await.unwrap();
        let rec = report.record.get("hopeless").unwrap();
        assert_eq!(rec.state, TaskState::Failed);
        assert_eq!(rec.attempts, 3);
        let error = rec.error.unwrap();
        assert!(error.contains("WEIR-021"));
        assert!(error.contains("always broken"));
    }

    #[tokio::test]
    async fn deadlock_guard_is_unreachable_for_valid_flows() {
        // Build-time validation prevents the deadlock path; a broad flow
        // with mixed fan-in/fan-out must drain cleanly.
        let mut b = FlowBuilder::new("wide");
        let root = b.add_task(echo("root", json!(0))).unwrap();
        for i in 0..5 {
            let mid = b
                .add_task(echo(&format!("mid{i}"), json!(i)).input(Input::output(&root)))
                .unwrap();
            b.add_task(
                echo(&format!("leaf{i}"), json!(i)).input(Input::output(&mid)),
            )
            .unwrap();
        }

        let report = Runner::new(b.build().unwrap()).run().await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.summary.succeeded, 11);
    }
}
