// src/types.rs

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a runnable unit of work.
///
/// The same enum is used on two axes of [`crate::task::TaskState`]:
///
/// - `status`: outcome-oriented ("how did/will this end up")
/// - `run_state`: phase-oriented ("what is it doing right now")
///
/// A task can therefore be `run_state = Running` while its `status` is still
/// `Pending`.
///
/// Serialized forms match the wire strings consumed by remote observers
/// (e.g. "Not Started").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnableStatus {
    #[serde(rename = "Not Started")]
    NotStarted,
    Initialized,
    Started,
    Planning,
    Prepared,
    Ready,
    Pending,
    Running,
    Passed,
    Accepted,
    Completed,
    Failed,
    /// Forced terminal failure caused by a failed upstream dependency.
    /// The node's own task logic was never invoked.
    Skipped,
}

impl RunnableStatus {
    /// No further automatic transition occurs from these within one run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunnableStatus::Passed
                | RunnableStatus::Accepted
                | RunnableStatus::Completed
                | RunnableStatus::Failed
                | RunnableStatus::Skipped
        )
    }

    /// Terminal *and* successful; dependents gate on this.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            RunnableStatus::Passed | RunnableStatus::Accepted | RunnableStatus::Completed
        )
    }
}

impl fmt::Display for RunnableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunnableStatus::NotStarted => "Not Started",
            RunnableStatus::Initialized => "Initialized",
            RunnableStatus::Started => "Started",
            RunnableStatus::Planning => "Planning",
            RunnableStatus::Prepared => "Prepared",
            RunnableStatus::Ready => "Ready",
            RunnableStatus::Pending => "Pending",
            RunnableStatus::Running => "Running",
            RunnableStatus::Passed => "Passed",
            RunnableStatus::Accepted => "Accepted",
            RunnableStatus::Completed => "Completed",
            RunnableStatus::Failed => "Failed",
            RunnableStatus::Skipped => "Skipped",
        };
        f.write_str(s)
    }
}

/// Result of driving one node's task to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(RunnableStatus::Completed.is_terminal());
        assert!(RunnableStatus::Skipped.is_terminal());
        assert!(!RunnableStatus::Running.is_terminal());
        assert!(!RunnableStatus::Pending.is_terminal());
    }

    #[test]
    fn success_excludes_failure_terminals() {
        assert!(RunnableStatus::Passed.is_success());
        assert!(RunnableStatus::Accepted.is_success());
        assert!(!RunnableStatus::Failed.is_success());
        assert!(!RunnableStatus::Skipped.is_success());
    }

    #[test]
    fn wire_format_uses_spaced_not_started() {
        let s = serde_json::to_string(&RunnableStatus::NotStarted).unwrap();
        assert_eq!(s, "\"Not Started\"");
    }
}
