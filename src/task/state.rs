// src/task/state.rs

//! Lifecycle state attached to a runnable unit of work, plus the shared
//! handle used to mutate and snapshot it.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::types::RunnableStatus;

/// Identity of a task, independent of the node that carries it.
#[derive(Debug, Clone, Serialize)]
pub struct TaskMetadata {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TaskMetadata {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description,
        }
    }
}

/// The `{time, value, error, author}` tuple a task produces.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResults {
    pub time: DateTime<Utc>,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl TaskResults {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            time: Utc::now(),
            value,
            error: None,
            author: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// Snapshot-able lifecycle state of one task.
///
/// `status` is the outcome axis, `run_state` the phase axis; see
/// [`RunnableStatus`]. The three logs are append-only for the duration of a
/// run and cleared only by [`TaskState::reset`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    pub status: RunnableStatus,
    pub run_state: RunnableStatus,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub messages: Vec<String>,
    pub stopped: bool,
}

impl TaskState {
    pub fn new() -> Self {
        Self {
            status: RunnableStatus::NotStarted,
            run_state: RunnableStatus::NotStarted,
            warnings: Vec::new(),
            errors: Vec::new(),
            messages: Vec::new(),
            stopped: false,
        }
    }

    fn reset(&mut self) {
        *self = TaskState::new();
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap handle to a task's state, shared between the owning node and the
/// runner while the runner is checked out for execution.
///
/// The mutex is held only for short, non-await sections, so per-task
/// transitions stay sequential and race-free.
#[derive(Debug, Clone)]
pub struct SharedTaskState {
    inner: Arc<Mutex<TaskState>>,
}

impl SharedTaskState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TaskState::new())),
        }
    }

    pub fn snapshot(&self) -> TaskState {
        self.lock().clone()
    }

    pub fn status(&self) -> RunnableStatus {
        self.lock().status
    }

    pub fn run_state(&self) -> RunnableStatus {
        self.lock().run_state
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Move `status`. Ignored once the task is stopped or already terminal;
    /// only an explicit [`SharedTaskState::reset`] leaves a terminal state.
    pub fn set_status(&self, status: RunnableStatus) {
        let mut state = self.lock();
        if state.stopped {
            debug!(%status, "ignoring status change on stopped task");
            return;
        }
        if state.status.is_terminal() {
            debug!(
                current = %state.status,
                requested = %status,
                "ignoring status change on terminal task"
            );
            return;
        }
        state.status = status;
    }

    /// Move `run_state`. Ignored once the task is stopped.
    pub fn set_run_state(&self, run_state: RunnableStatus) {
        let mut state = self.lock();
        if state.stopped {
            debug!(%run_state, "ignoring run_state change on stopped task");
            return;
        }
        state.run_state = run_state;
    }

    pub fn push_message(&self, message: impl Into<String>) {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        state.messages.push(message.into());
    }

    pub fn push_warning(&self, warning: impl Into<String>) {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        state.warnings.push(warning.into());
    }

    pub fn push_error(&self, error: impl Into<String>) {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        state.errors.push(error.into());
    }

    /// Acknowledge a stop request: after this, no further mutation is
    /// applied to the state.
    pub fn stop(&self) {
        self.lock().stopped = true;
    }

    /// Clear everything back to `NotStarted` for a fresh run.
    pub fn reset(&self) {
        self.lock().reset();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TaskState> {
        // A poisoned lock means a panic inside a short non-await section;
        // the state itself is still coherent, so keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SharedTaskState {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain, transmissible snapshot of a task: identity plus state, no live
/// callback references.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub metadata: TaskMetadata,
    pub state: TaskState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_monotonic_within_a_run() {
        let state = SharedTaskState::new();
        state.set_status(RunnableStatus::Failed);
        state.set_status(RunnableStatus::Running);
        assert_eq!(state.status(), RunnableStatus::Failed);
    }

    #[test]
    fn reset_leaves_terminal_state_and_clears_logs() {
        let state = SharedTaskState::new();
        state.push_message("m");
        state.push_error("e");
        state.set_status(RunnableStatus::Failed);

        state.reset();

        let snap = state.snapshot();
        assert_eq!(snap.status, RunnableStatus::NotStarted);
        assert_eq!(snap.run_state, RunnableStatus::NotStarted);
        assert!(snap.messages.is_empty());
        assert!(snap.errors.is_empty());
    }

    #[test]
    fn no_mutation_after_stop() {
        let state = SharedTaskState::new();
        state.stop();

        state.set_status(RunnableStatus::Running);
        state.set_run_state(RunnableStatus::Running);
        state.push_message("late");

        let snap = state.snapshot();
        assert!(snap.stopped);
        assert_eq!(snap.status, RunnableStatus::NotStarted);
        assert_eq!(snap.run_state, RunnableStatus::NotStarted);
        assert!(snap.messages.is_empty());
    }
}
