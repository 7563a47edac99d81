//! Task and external-job lifecycle states
//!
//! Task states move forward only: Pending → Running → {Success | Failed},
//! or Pending → Skipped. Job states track the external system's view of a
//! submitted job and never regress either.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl TaskState {
    /// Terminal states admit no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Forward-only transition check. Running → Skipped is the
    /// cancellation exit: a cancelled run marks every non-terminal task
    /// Skipped, including tasks already mid-execution.
    pub fn can_transition(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Success)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Skipped)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Tracker-side state of an external job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    NotSubmitted,
    Submitted,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSubmitted => write!(f, "not_submitted"),
            Self::Submitted => write!(f, "submitted"),
            Self::Polling => write!(f, "polling"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(TaskState::Pending.can_transition(TaskState::Running));
        assert!(TaskState::Pending.can_transition(TaskState::Skipped));
        assert!(TaskState::Running.can_transition(TaskState::Success));
        assert!(TaskState::Running.can_transition(TaskState::Failed));
        // cancellation exit
        assert!(TaskState::Running.can_transition(TaskState::Skipped));
    }

    #[test]
    fn backward_transitions_rejected() {
        assert!(!TaskState::Success.can_transition(TaskState::Running));
        assert!(!TaskState::Failed.can_transition(TaskState::Pending));
        assert!(!TaskState::Skipped.can_transition(TaskState::Running));
        assert!(!TaskState::Pending.can_transition(TaskState::Success));
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Success.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Skipped.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());

        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::TimedOut.is_terminal());
        assert!(!JobState::Polling.is_terminal());
    }

    #[test]
    fn states_serialize_snake_case() {
        let json = serde_json::to_value(TaskState::Skipped).unwrap();
        assert_eq!(json, "skipped");
        let json = serde_json::to_value(JobState::TimedOut).unwrap();
        assert_eq!(json, "timed_out");
    }
}
