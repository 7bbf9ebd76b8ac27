// src/stream/record.rs

//! Typed records published on a correlation channel, and the process
//! boundary events they are built from.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

/// Which stream (or failure path) a log record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Stdout,
    Stderr,
    /// Infrastructure failure (e.g. the process could not be spawned),
    /// distinct from task-logic failure.
    Error,
}

/// Terminal state of the bound process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Completed,
    Failed,
}

/// One record on a correlation channel.
///
/// Subscribers receive, in order: zero or more `Log` records, then exactly
/// one `Status`, then exactly one `Complete`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum StreamRecord {
    Log { kind: LogKind, message: String },
    #[serde(rename_all = "camelCase")]
    Status {
        state: StreamState,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    Complete,
}

impl StreamRecord {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamRecord::Complete)
    }
}

/// A record paired with the correlation id it belongs to, as delivered to
/// subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamUpdate {
    pub correlation_id: String,
    pub record: StreamRecord,
}

/// Event emitted by an external process/container handle.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    /// Terminated with the given exit code, if one was available.
    Exited(Option<i32>),
    /// The process could not be started at all.
    SpawnFailed(String),
}

/// The process boundary: anything exposing standard-stream events and a
/// termination event is treated uniformly by the correlator.
///
/// Returning `None` means the source is exhausted; without a prior
/// `Exited`/`SpawnFailed` that counts as abnormal termination.
#[async_trait]
pub trait ProcessEvents: Send + 'static {
    async fn next_event(&mut self) -> Option<ProcessEvent>;
}

#[async_trait]
impl ProcessEvents for mpsc::Receiver<ProcessEvent> {
    async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.recv().await
    }
}
