// src/task/runnable.rs

//! The opaque task capability consumed by the engine, and the log handle
//! handed to implementations while they run.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::task::state::{SharedTaskState, TaskResults};
use crate::types::RunnableStatus;

/// Contract for an externally supplied unit of work.
///
/// The engine never inspects anything beyond this surface: concrete
/// conformance checks (credential issuance, presentation, trust-registry
/// queries, ...) are task kinds implementing this trait.
///
/// `run` reports failure by returning an error; the surrounding
/// [`TaskRunner`](crate::task::TaskRunner) captures it into task state so
/// that failures never escape the task boundary into the scheduler.
#[async_trait]
pub trait RunnableTask: Send {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Idempotent setup. Missing prerequisites surface as
    /// [`PipelineError::Preparation`](crate::errors::PipelineError).
    async fn prepare(&mut self, log: &TaskLog) -> Result<()>;

    /// Do the work. `input` carries the results of every dependency, in
    /// dependency order.
    async fn run(&mut self, log: &TaskLog, input: &[TaskResults]) -> anyhow::Result<()>;

    /// Last computed results, if any run has produced them.
    fn results(&self) -> Option<TaskResults>;

    /// Best-effort cancellation; the default does nothing.
    async fn stop(&mut self) {}

    /// Terminal status recorded on a successful run. Task kinds that judge
    /// conformance may report `Passed` or `Accepted` instead.
    fn success_status(&self) -> RunnableStatus {
        RunnableStatus::Completed
    }
}

type UpdateSignal = Arc<dyn Fn() + Send + Sync>;

/// Append-only log handle given to a task while it runs.
///
/// Entries land in the owning node's [`TaskState`](crate::task::TaskState);
/// when the task runs under a pipeline, every append also signals the
/// scheduler loop so node observers see the update live.
#[derive(Clone)]
pub struct TaskLog {
    state: SharedTaskState,
    signal: Option<UpdateSignal>,
}

impl TaskLog {
    /// A log without an update signal, for driving a runner outside a
    /// pipeline pass.
    pub fn detached(state: SharedTaskState) -> Self {
        Self {
            state,
            signal: None,
        }
    }

    pub(crate) fn with_signal(state: SharedTaskState, signal: UpdateSignal) -> Self {
        Self {
            state,
            signal: Some(signal),
        }
    }

    pub fn message(&self, message: impl Into<String>) {
        self.state.push_message(message);
        self.ping();
    }

    pub fn warning(&self, warning: impl Into<String>) {
        self.state.push_warning(warning);
        self.ping();
    }

    pub fn error(&self, error: impl Into<String>) {
        self.state.push_error(error);
        self.ping();
    }

    /// Notify observers without appending anything. Used by the runner after
    /// state transitions.
    pub(crate) fn ping(&self) {
        if let Some(signal) = &self.signal {
            signal();
        }
    }
}

impl std::fmt::Debug for TaskLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLog")
            .field("signalled", &self.signal.is_some())
            .finish()
    }
}
