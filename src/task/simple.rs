// src/task/simple.rs

//! A trivial task kind: wait, then report a fixed value. Useful for wiring
//! demo pipelines and for exercising the engine end to end.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::Result;
use crate::task::runnable::{RunnableTask, TaskLog};
use crate::task::state::TaskResults;

pub struct SimpleTask {
    name: String,
    description: Option<String>,
    delay: Duration,
    value: Value,
    results: Option<TaskResults>,
}

impl SimpleTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            delay: Duration::ZERO,
            value: Value::Null,
            results: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }
}

#[async_trait]
impl RunnableTask for SimpleTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn prepare(&mut self, _log: &TaskLog) -> Result<()> {
        Ok(())
    }

    async fn run(&mut self, log: &TaskLog, _input: &[TaskResults]) -> anyhow::Result<()> {
        if !self.delay.is_zero() {
            log.message(format!("waiting for {}ms", self.delay.as_millis()));
            tokio::time::sleep(self.delay).await;
        }
        self.results = Some(TaskResults::new(self.value.clone()).with_author(&self.name));
        Ok(())
    }

    fn results(&self) -> Option<TaskResults> {
        self.results.clone()
    }
}
