use std::collections::VecDeque;

use async_trait::async_trait;

use certflow::stream::{ProcessEvent, ProcessEvents};

/// A scripted process event source, standing in for a real child process.
///
/// Yields its events in order with a cooperative yield between each, so
/// registry pumps interleave with the test body the way a real process
/// stream would.
pub struct ScriptedProcess {
    events: VecDeque<ProcessEvent>,
}

impl ScriptedProcess {
    pub fn new(events: impl IntoIterator<Item = ProcessEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    /// A process that prints `lines` to stdout and exits cleanly.
    pub fn succeeding(lines: &[&str]) -> Self {
        let mut events: Vec<ProcessEvent> = lines
            .iter()
            .map(|line| ProcessEvent::Stdout(line.to_string()))
            .collect();
        events.push(ProcessEvent::Exited(Some(0)));
        Self::new(events)
    }

    /// A process that prints `lines` to stderr and exits with `code`.
    pub fn failing(lines: &[&str], code: i32) -> Self {
        let mut events: Vec<ProcessEvent> = lines
            .iter()
            .map(|line| ProcessEvent::Stderr(line.to_string()))
            .collect();
        events.push(ProcessEvent::Exited(Some(code)));
        Self::new(events)
    }

    /// A process that never started.
    pub fn spawn_failure(reason: &str) -> Self {
        Self::new([ProcessEvent::SpawnFailed(reason.to_string())])
    }
}

#[async_trait]
impl ProcessEvents for ScriptedProcess {
    async fn next_event(&mut self) -> Option<ProcessEvent> {
        tokio::task::yield_now().await;
        self.events.pop_front()
    }
}
