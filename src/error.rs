//! Weir Error Types with Error Codes
//!
//! Error code ranges:
//! - WEIR-000-009: Flow construction errors
//! - WEIR-010-019: Graph validation errors
//! - WEIR-020-029: Task execution errors
//! - WEIR-030-039: External job errors
//! - WEIR-040-049: Run-level errors

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WeirError>;

/// All error variants are part of the public API.
///
/// Implements both `thiserror::Error` for std error compatibility
/// and `miette::Diagnostic` for terminal error display with help text.
#[derive(Error, Debug, Diagnostic)]
pub enum WeirError {
    // ═══════════════════════════════════════════
    // FLOW CONSTRUCTION ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[WEIR-001] Invalid task id '{id}'")]
    #[diagnostic(
        code(weir::invalid_task_id),
        help("Task ids start with an alphanumeric and may contain '-' and '_'")
    )]
    InvalidTaskId { id: String },

    #[error("[WEIR-002] Duplicate task id '{id}'")]
    #[diagnostic(
        code(weir::duplicate_task),
        help("Every task id must be unique within a flow")
    )]
    DuplicateTask { id: String },

    #[error("[WEIR-003] Flow '{flow}' has no tasks")]
    #[diagnostic(code(weir::empty_flow), help("Register at least one task before build()"))]
    EmptyFlow { flow: String },

    // ═══════════════════════════════════════════
    // GRAPH VALIDATION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[WEIR-010] Unknown task '{id}' referenced by {referenced_by}")]
    #[diagnostic(
        code(weir::unknown_task),
        help("Edges and input bindings may only reference registered tasks")
    )]
    UnknownTask { id: String, referenced_by: String },

    #[error("[WEIR-011] Cycle detected in flow graph: {cycle}")]
    #[diagnostic(
        code(weir::cycle_detected),
        help("Remove one of the edges on the cycle path; flows must be acyclic")
    )]
    CycleDetected { cycle: String },

    // ═══════════════════════════════════════════
    // TASK EXECUTION ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[WEIR-020] Task '{task_id}' failed: {reason}")]
    TaskFailed { task_id: String, reason: String },

    #[error("[WEIR-021] Task '{task_id}' failed after {attempts} attempts: {last_error}")]
    #[diagnostic(
        code(weir::retry_exhausted),
        help("Raise RetryPolicy::max_retries or fix the underlying failure")
    )]
    RetryExhausted {
        task_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("[WEIR-022] No recorded output for upstream task '{task_id}'")]
    #[diagnostic(
        code(weir::missing_output),
        help("Input bindings resolve only after the producing task succeeds")
    )]
    MissingOutput { task_id: String },

    // ═══════════════════════════════════════════
    // EXTERNAL JOB ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[WEIR-030] Job submission failed on '{service}': {reason}")]
    #[diagnostic(
        code(weir::job_submit),
        help("Check the job service endpoint and request payload")
    )]
    JobSubmit { service: String, reason: String },

    #[error("[WEIR-031] External job '{job_id}' failed: {detail}")]
    ExternalJob { job_id: String, detail: String },

    #[error("[WEIR-032] External job '{job_id}' still not terminal after {timeout_ms}ms")]
    #[diagnostic(
        code(weir::poll_timeout),
        help("Raise TrackerConfig::timeout or investigate the stuck remote job")
    )]
    PollTimeout { job_id: String, timeout_ms: u64 },

    #[error("[WEIR-033] Invalid job service endpoint '{url}': {reason}")]
    #[diagnostic(
        code(weir::invalid_endpoint),
        help("Endpoints must be http(s) URLs with a host")
    )]
    InvalidEndpoint { url: String, reason: String },

    // ═══════════════════════════════════════════
    // RUN-LEVEL ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[WEIR-040] Deadlock: no tasks ready but run not complete")]
    Deadlock,

    #[error("[WEIR-041] Run cancelled")]
    RunCancelled,
}
