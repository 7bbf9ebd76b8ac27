use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::{Value, json};

use certflow::errors::Result;
use certflow::task::{RunnableTask, TaskLog, TaskResults};

/// Shared execution trace for asserting invocation order across tasks.
pub type ExecutionLog = Arc<Mutex<Vec<String>>>;

pub fn execution_log() -> ExecutionLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &ExecutionLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// A task that records its `prepare` and `run` calls into a shared trace.
///
/// - `failing(n)` makes the first `n` run attempts fail, for retry tests.
/// - `with_delay` keeps the task busy so concurrency is observable.
/// - each run also records the authors of its dependency results, so tests
///   can assert what flowed downstream.
pub struct RecordingTask {
    name: String,
    trace: ExecutionLog,
    fail_remaining: u32,
    fail_prepare: bool,
    delay: Option<Duration>,
    value: Value,
    results: Option<TaskResults>,
}

impl RecordingTask {
    pub fn new(name: impl Into<String>, trace: ExecutionLog) -> Self {
        let name = name.into();
        Self {
            value: json!({ "task": name.clone() }),
            name,
            trace,
            fail_remaining: 0,
            fail_prepare: false,
            delay: None,
            results: None,
        }
    }

    /// Fail the first `attempts` run invocations.
    pub fn failing(mut self, attempts: u32) -> Self {
        self.fail_remaining = attempts;
        self
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    fn record(&self, entry: String) {
        self.trace.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl RunnableTask for RecordingTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&mut self, _log: &TaskLog) -> Result<()> {
        self.record(format!("prepare:{}", self.name));
        if self.fail_prepare {
            return Err(certflow::PipelineError::Preparation(format!(
                "task '{}' refused to prepare",
                self.name
            )));
        }
        Ok(())
    }

    async fn run(&mut self, log: &TaskLog, input: &[TaskResults]) -> anyhow::Result<()> {
        let authors: Vec<_> = input
            .iter()
            .filter_map(|r| r.author.clone())
            .collect();
        self.record(format!("run:{}<-{}", self.name, authors.join(",")));
        log.message(format!("task '{}' started", self.name));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_remaining > 0 {
            self.fail_remaining -= 1;
            bail!("task '{}' failed on purpose", self.name);
        }

        self.results = Some(
            TaskResults::new(self.value.clone()).with_author(self.name.clone()),
        );
        Ok(())
    }

    fn results(&self) -> Option<TaskResults> {
        self.results.clone()
    }
}
