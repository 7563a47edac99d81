//! Weir - DAG flow orchestration engine with external job tracking

pub mod error;
pub mod event_log;
pub mod flow;
pub mod graph;
pub mod job;
pub mod record;
pub mod runner;
pub mod state;
pub mod task;

pub use error::{Result, WeirError};
pub use event_log::{Event, EventKind, EventLog};
pub use flow::{Edge, EdgeOrigin, Flow, FlowBuilder};
pub use graph::FlowGraph;
pub use job::{
    ExternalJobHandle, HttpJobService, JobId, JobRequest, JobService, JobStatus, JobTracker,
    MockJobService, TrackerConfig,
};
pub use record::{FlowOutcome, RunRecord, RunReport, RunSummary, TaskRecord};
pub use runner::{RunConfig, Runner};
pub use state::{JobState, TaskState};
pub use task::{Input, RetryPolicy, Task, TaskDef, TaskHandle, TaskInputs, TaskKind};
