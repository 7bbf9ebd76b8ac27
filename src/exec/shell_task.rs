// src/exec/shell_task.rs

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::json;

use crate::exec::command::spawn_shell;
use crate::stream::record::{LogKind, ProcessEvent, ProcessEvents, StreamRecord, StreamState};
use crate::stream::registry::CorrelationRegistry;
use crate::task::runnable::{RunnableTask, TaskLog};
use crate::task::state::TaskResults;

/// A pipeline task that runs one shell command to completion.
///
/// By default the task consumes the process output itself. When given a
/// registry and a correlation id via [`ShellTask::with_correlation`], the
/// process is bound through the registry instead, so external subscribers of
/// that id see the same stream the task bases its outcome on.
pub struct ShellTask {
    name: String,
    command: String,
    correlation: Option<(CorrelationRegistry, String)>,
    results: Option<TaskResults>,
}

impl ShellTask {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            correlation: None,
            results: None,
        }
    }

    /// Publish this task's process output through `registry` under
    /// `correlation_id`.
    pub fn with_correlation(
        mut self,
        registry: CorrelationRegistry,
        correlation_id: impl Into<String>,
    ) -> Self {
        self.correlation = Some((registry, correlation_id.into()));
        self
    }

    /// Consume process events directly, logging output lines as they arrive.
    async fn run_direct(&self, log: &TaskLog) -> Result<Option<i32>> {
        let mut events = spawn_shell(&self.command);
        loop {
            match events.next_event().await {
                Some(ProcessEvent::Stdout(line)) => log.message(line),
                Some(ProcessEvent::Stderr(line)) => log.warning(line),
                Some(ProcessEvent::SpawnFailed(err)) => {
                    bail!("spawning '{}' failed: {err}", self.command);
                }
                Some(ProcessEvent::Exited(code)) => return Ok(code),
                None => bail!("process event stream ended without an exit status"),
            }
        }
    }

    /// Run through the correlation registry and derive the outcome from the
    /// published terminal `Status` record.
    async fn run_correlated(
        &self,
        log: &TaskLog,
        registry: &CorrelationRegistry,
        correlation_id: &str,
    ) -> Result<Option<i32>> {
        let mut updates = registry.bind_subscribed(correlation_id, spawn_shell(&self.command))?;

        let mut status = None;
        while let Some(update) = updates.recv().await {
            match update.record {
                StreamRecord::Log { kind, message } => match kind {
                    LogKind::Stdout => log.message(message),
                    LogKind::Stderr => log.warning(message),
                    LogKind::Error => log.error(message),
                },
                StreamRecord::Status { state, exit_code } => {
                    status = Some((state, exit_code));
                }
                StreamRecord::Complete => break,
            }
        }

        match status {
            Some((StreamState::Completed, exit_code)) => Ok(exit_code),
            Some((StreamState::Failed, exit_code)) => Ok(exit_code.or(Some(-1))),
            None => bail!("correlated stream closed without a status record"),
        }
    }
}

#[async_trait]
impl RunnableTask for ShellTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&mut self, _log: &TaskLog) -> crate::errors::Result<()> {
        if self.command.trim().is_empty() {
            return Err(crate::errors::PipelineError::Preparation(format!(
                "task '{}' has an empty command",
                self.name
            )));
        }
        Ok(())
    }

    async fn run(&mut self, log: &TaskLog, _input: &[TaskResults]) -> Result<()> {
        let exit_code = match &self.correlation {
            Some((registry, correlation_id)) => {
                self.run_correlated(log, registry, correlation_id).await?
            }
            None => self.run_direct(log).await?,
        };

        let code = exit_code.ok_or_else(|| anyhow!("process terminated without an exit code"))?;
        if code != 0 {
            bail!("'{}' exited with code {code}", self.command);
        }

        self.results = Some(
            TaskResults::new(json!({ "exitCode": code })).with_author(self.name.clone()),
        );
        Ok(())
    }

    fn results(&self) -> Option<TaskResults> {
        self.results.clone()
    }
}
