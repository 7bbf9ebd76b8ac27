// src/task/runner.rs

//! The task state machine: wraps an opaque [`RunnableTask`] and drives its
//! lifecycle, capturing failures into state instead of propagating them.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{PipelineError, Result};
use crate::task::runnable::{RunnableTask, TaskLog};
use crate::task::state::{SharedTaskState, TaskMetadata, TaskResults, TaskSnapshot};
use crate::types::{RunnableStatus, TaskOutcome};

/// Owns the lifecycle of one unit of work.
///
/// The runner holds the task implementation as a capability and the
/// [`SharedTaskState`] it mutates; the node carrying this runner keeps a
/// clone of the same state handle for snapshotting while the runner is
/// checked out into a spawned execution.
pub struct TaskRunner {
    metadata: TaskMetadata,
    state: SharedTaskState,
    task: Box<dyn RunnableTask>,
    results: Option<TaskResults>,
}

impl TaskRunner {
    pub fn new(task: Box<dyn RunnableTask>) -> Self {
        let metadata = TaskMetadata::new(task.name(), task.description().map(String::from));
        Self {
            metadata,
            state: SharedTaskState::new(),
            task,
            results: None,
        }
    }

    pub fn metadata(&self) -> &TaskMetadata {
        &self.metadata
    }

    /// Handle to the state this runner mutates.
    pub fn shared_state(&self) -> SharedTaskState {
        self.state.clone()
    }

    pub fn status(&self) -> RunnableStatus {
        self.state.status()
    }

    /// Idempotent setup. A second call on an already-prepared task changes
    /// nothing and appends no duplicate log entries.
    pub async fn prepare(&mut self) -> Result<()> {
        let log = TaskLog::detached(self.state.clone());
        self.prepare_with(&log).await
    }

    pub(crate) async fn prepare_with(&mut self, log: &TaskLog) -> Result<()> {
        let status = self.state.status();
        if status == RunnableStatus::Prepared {
            debug!(task = %self.metadata.name, "already prepared; nothing to do");
            return Ok(());
        }
        if status.is_terminal() || status == RunnableStatus::Running {
            debug!(task = %self.metadata.name, %status, "prepare skipped in current phase");
            return Ok(());
        }

        self.task.prepare(log).await?;

        log.message(format!("task '{}' prepared", self.metadata.name));
        self.state.set_status(RunnableStatus::Prepared);
        log.ping();
        Ok(())
    }

    /// Run the task to a terminal state. Failures are absorbed into the
    /// task's state; this never returns an error.
    pub async fn run(&mut self, input: &[TaskResults]) -> TaskOutcome {
        let log = TaskLog::detached(self.state.clone());
        self.run_with(&log, input, 1, Duration::ZERO).await
    }

    pub(crate) async fn run_with(
        &mut self,
        log: &TaskLog,
        input: &[TaskResults],
        max_attempts: u32,
        retry_delay: Duration,
    ) -> TaskOutcome {
        if self.state.is_stopped() {
            debug!(task = %self.metadata.name, "run refused on stopped task");
            return TaskOutcome::Failed;
        }
        let status = self.state.status();
        if status.is_terminal() {
            debug!(task = %self.metadata.name, %status, "run refused on terminal task");
            return if status.is_success() {
                TaskOutcome::Success
            } else {
                TaskOutcome::Failed
            };
        }

        self.state.set_run_state(RunnableStatus::Running);
        log.message(format!("task '{}' is running", self.metadata.name));

        let max_attempts = max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.task.run(log, input).await {
                Ok(()) => {
                    self.results = self.task.results();
                    self.state.set_status(self.task.success_status());
                    self.state.set_run_state(RunnableStatus::Completed);
                    log.ping();
                    info!(task = %self.metadata.name, status = %self.state.status(), "task completed");
                    return TaskOutcome::Success;
                }
                Err(err) => {
                    warn!(
                        task = %self.metadata.name,
                        attempt,
                        error = %err,
                        "task attempt failed"
                    );
                    log.error(format!("attempt {attempt}: {err:#}"));

                    if attempt < max_attempts {
                        log.message(format!(
                            "retrying '{}' in {}ms",
                            self.metadata.name,
                            retry_delay.as_millis()
                        ));
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }

        self.state.set_status(RunnableStatus::Failed);
        self.state.set_run_state(RunnableStatus::Failed);
        log.ping();
        TaskOutcome::Failed
    }

    /// Last computed results; fails before any successful run.
    pub fn results(&self) -> Result<&TaskResults> {
        self.results.as_ref().ok_or(PipelineError::NoResults)
    }

    pub(crate) fn take_results(&self) -> Option<TaskResults> {
        self.results.clone()
    }

    /// Advisory cancellation: acknowledge the stop, then forward the signal
    /// to the task implementation. No state mutation happens afterwards.
    pub async fn stop(&mut self) {
        self.state
            .push_message(format!("stop requested for '{}'", self.metadata.name));
        self.state.stop();
        self.task.stop().await;
    }

    /// Back to `NotStarted` with cleared logs and results, for a fresh run.
    pub fn reset(&mut self) {
        self.state.reset();
        self.results = None;
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.metadata.id,
            metadata: self.metadata.clone(),
            state: self.state.snapshot(),
        }
    }

    /// Full lifecycle used by the pipeline executor: prepare, then run.
    /// Preparation failures are recorded as task failures so that sibling
    /// nodes continue undisturbed.
    pub(crate) async fn execute(
        &mut self,
        log: &TaskLog,
        input: &[TaskResults],
        max_attempts: u32,
        retry_delay: Duration,
    ) -> TaskOutcome {
        if let Err(err) = self.prepare_with(log).await {
            warn!(task = %self.metadata.name, error = %err, "preparation failed");
            log.error(format!("preparation failed: {err}"));
            self.state.set_status(RunnableStatus::Failed);
            self.state.set_run_state(RunnableStatus::Failed);
            log.ping();
            return TaskOutcome::Failed;
        }
        self.run_with(log, input, max_attempts, retry_delay).await
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("metadata", &self.metadata)
            .field("state", &self.state.snapshot())
            .finish()
    }
}
