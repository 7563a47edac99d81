//! Event sourcing for flow runs
//!
//! Full audit trail of one run with replay capability:
//! - Event: envelope with monotonic id + ms offset + kind
//! - EventKind: run-level, task-level, and job-level variants
//! - EventLog: thread-safe, append-only
//!
//! The monotonic ids double as the external ordering witness: a task's
//! TaskStarted id is strictly greater than every upstream TaskCompleted id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::FlowOutcome;
use crate::state::JobState;

/// Single event in the run's execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence id (for ordering)
    pub id: u64,
    /// Time since run start (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EventKind,
}

/// All event types across the three levels.
///
/// Uses Arc<str> task ids for zero-cost cloning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        run_id: String,
        flow: Arc<str>,
        task_count: usize,
    },
    RunCompleted {
        outcome: FlowOutcome,
        total_duration_ms: u64,
    },
    RunFailed {
        error: String,
    },
    RunCancelled,

    // ═══════════════════════════════════════════
    // TASK LEVEL
    // ═══════════════════════════════════════════
    TaskScheduled {
        task_id: Arc<str>,
        dependencies: Vec<Arc<str>>,
    },
    TaskStarted {
        task_id: Arc<str>,
        attempt: u32,
    },
    TaskCompleted {
        task_id: Arc<str>,
        output: Arc<Value>,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: Arc<str>,
        error: String,
        duration_ms: u64,
    },
    TaskSkipped {
        task_id: Arc<str>,
        cause: String,
    },
    TaskRetrying {
        task_id: Arc<str>,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    // ═══════════════════════════════════════════
    // JOB LEVEL (external job tracking)
    // ═══════════════════════════════════════════
    JobSubmitted {
        task_id: Arc<str>,
        job_id: String,
    },
    JobPolled {
        task_id: Arc<str>,
        job_id: String,
        status: JobState,
    },
    JobCancelRequested {
        task_id: Arc<str>,
        job_id: String,
    },
}

impl EventKind {
    /// Extract task_id if event is task- or job-related
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskScheduled { task_id, .. }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskSkipped { task_id, .. }
            | Self::TaskRetrying { task_id, .. }
            | Self::JobSubmitted { task_id, .. }
            | Self::JobPolled { task_id, .. }
            | Self::JobCancelRequested { task_id, .. } => Some(task_id),
            Self::RunStarted { .. }
            | Self::RunCompleted { .. }
            | Self::RunFailed { .. }
            | Self::RunCancelled => None,
        }
    }

    /// Check if this is a run-level event
    pub fn is_run_event(&self) -> bool {
        matches!(
            self,
            Self::RunStarted { .. }
                | Self::RunCompleted { .. }
                | Self::RunFailed { .. }
                | Self::RunCancelled
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    /// Create a new event log (clock starts now)
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event id)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Filter events by task id
    pub fn filter_task(&self, task_id: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.task_id() == Some(task_id))
            .collect()
    }

    /// Run-level events only
    pub fn run_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_run_event())
            .collect()
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_id_extraction() {
        let started = EventKind::TaskStarted {
            task_id: "task1".into(),
            attempt: 1,
        };
        assert_eq!(started.task_id(), Some("task1"));

        let run = EventKind::RunStarted {
            run_id: "r".to_string(),
            flow: "f".into(),
            task_count: 5,
        };
        assert_eq!(run.task_id(), None);
    }

    #[test]
    fn emit_returns_monotonic_ids() {
        let log = EventLog::new();

        let id1 = log.emit(EventKind::RunCancelled);
        let id2 = log.emit(EventKind::TaskStarted {
            task_id: "t1".into(),
            attempt: 1,
        });
        let id3 = log.emit(EventKind::TaskSkipped {
            task_id: "t2".into(),
            cause: "t1".to_string(),
        });

        assert_eq!(id1, 0);
        assert_eq!(id2, 1);
        assert_eq!(id3, 2);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn filter_task_returns_only_matching() {
        let log = EventLog::new();
        log.emit(EventKind::RunStarted {
            run_id: "r".to_string(),
            flow: "f".into(),
            task_count: 2,
        });
        log.emit(EventKind::TaskStarted {
            task_id: "alpha".into(),
            attempt: 1,
        });
        log.emit(EventKind::TaskStarted {
            task_id: "beta".into(),
            attempt: 1,
        });
        log.emit(EventKind::TaskCompleted {
            task_id: "alpha".into(),
            output: Arc::new(json!("result")),
            duration_ms: 100,
        });

        let alpha = log.filter_task("alpha");
        assert_eq!(alpha.len(), 2);
        assert!(alpha.iter().all(|e| e.kind.task_id() == Some("alpha")));
        assert_eq!(log.filter_task("beta").len(), 1);
    }

    #[test]
    fn serializes_with_type_tag() {
        let kind = EventKind::JobPolled {
            task_id: "submit_a".into(),
            job_id: "42".to_string(),
            status: JobState::Polling,
        };

        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "job_polled");
        assert_eq!(json["job_id"], "42");
        assert_eq!(json["status"], "polling");
    }

    #[test]
    fn deserializes_from_tagged_json() {
        let json = json!({
            "type": "task_skipped",
            "task_id": "downstream",
            "cause": "upstream"
        });

        let kind: EventKind = serde_json::from_value(json).unwrap();
        assert_eq!(
            kind,
            EventKind::TaskSkipped {
                task_id: "downstream".into(),
                cause: "upstream".to_string(),
            }
        );
    }

    #[test]
    fn to_json_produces_array() {
        let log = EventLog::new();
        log.emit(EventKind::TaskStarted {
            task_id: "t".into(),
            attempt: 1,
        });

        let json = log.to_json();
        assert!(json.is_array());
        assert_eq!(json[0]["kind"]["type"], "task_started");
    }

    #[test]
    fn clones_share_storage() {
        let log = EventLog::new();
        let cloned = log.clone();
        log.emit(EventKind::RunCancelled);
        assert_eq!(cloned.len(), 1);
    }

    #[test]
    fn thread_safe_concurrent_emits() {
        use std::thread;

        let log = EventLog::new();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let log = log.clone();
                thread::spawn(move || {
                    log.emit(EventKind::TaskStarted {
                        task_id: Arc::from(format!("task{i}")),
                        attempt: 1,
                    })
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(log.len(), 10);

        let mut ids: Vec<u64> = log.events().iter().map(|e| e.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }
}
