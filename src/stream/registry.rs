// src/stream/registry.rs

//! The process/stream correlator: binds a spawned external unit of work to a
//! correlation id and fans its typed output records out to subscribers of
//! that id's channel, with replay for late joiners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{PipelineError, Result};
use crate::stream::record::{
    LogKind, ProcessEvent, ProcessEvents, StreamRecord, StreamState, StreamUpdate,
};

struct Channel {
    /// Guards against stale publishes from a previous binding of this id.
    epoch: u64,
    /// Ordered records so far, replayed to late joiners.
    buffer: Vec<StreamRecord>,
    subscribers: Vec<mpsc::UnboundedSender<StreamUpdate>>,
}

/// Registry of active correlation channels.
///
/// One orchestrator owns a registry and passes clones (cheap handles to the
/// same channel table) to whatever needs to start or watch a correlated
/// process. Exactly one process may be bound per correlation id at a time;
/// the entry is removed once the terminal record has been published, and a
/// later bind under the same id starts a brand-new channel.
#[derive(Clone)]
pub struct CorrelationRegistry {
    channels: Arc<Mutex<HashMap<String, Channel>>>,
    next_epoch: Arc<AtomicU64>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            next_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bind a process event source to `correlation_id` and start pumping its
    /// output into the channel.
    ///
    /// Fails with [`PipelineError::CorrelationInUse`] while a previous
    /// binding for the same id is still active.
    pub fn bind(
        &self,
        correlation_id: impl Into<String>,
        events: impl ProcessEvents,
    ) -> Result<()> {
        self.open(correlation_id.into(), None, events)
    }

    /// Like [`bind`](Self::bind), but also returns a subscription registered
    /// before the first record can be published, so the caller cannot miss
    /// the terminal sequence even to a process that exits immediately.
    pub fn bind_subscribed(
        &self,
        correlation_id: impl Into<String>,
        events: impl ProcessEvents,
    ) -> Result<mpsc::UnboundedReceiver<StreamUpdate>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.open(correlation_id.into(), Some(tx), events)?;
        Ok(rx)
    }

    fn open(
        &self,
        correlation_id: String,
        subscriber: Option<mpsc::UnboundedSender<StreamUpdate>>,
        events: impl ProcessEvents,
    ) -> Result<()> {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);

        {
            let mut channels = self.lock();
            if channels.contains_key(&correlation_id) {
                return Err(PipelineError::CorrelationInUse(correlation_id));
            }
            channels.insert(
                correlation_id.clone(),
                Channel {
                    epoch,
                    buffer: Vec::new(),
                    subscribers: subscriber.into_iter().collect(),
                },
            );
        }
        info!(correlation_id = %correlation_id, "correlation channel opened");

        let registry = self.clone();
        tokio::spawn(async move {
            registry.pump(correlation_id, epoch, events).await;
        });
        Ok(())
    }

    /// Join the channel for `correlation_id`.
    ///
    /// An active channel replays its buffered records first, then delivers
    /// live ones. An unknown or already-completed id yields an immediate
    /// terminal `Complete` notice, so a subscriber never hangs.
    pub fn subscribe(&self, correlation_id: &str) -> mpsc::UnboundedReceiver<StreamUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channels = self.lock();
        match channels.get_mut(correlation_id) {
            Some(channel) => {
                for record in &channel.buffer {
                    let _ = tx.send(StreamUpdate {
                        correlation_id: correlation_id.to_string(),
                        record: record.clone(),
                    });
                }
                channel.subscribers.push(tx);
            }
            None => {
                debug!(correlation_id, "subscribe to unknown channel; sending terminal notice");
                let _ = tx.send(StreamUpdate {
                    correlation_id: correlation_id.to_string(),
                    record: StreamRecord::Complete,
                });
            }
        }
        rx
    }

    /// Whether a process is currently bound to this id.
    pub fn is_bound(&self, correlation_id: &str) -> bool {
        self.lock().contains_key(correlation_id)
    }

    /// Number of active channels.
    pub fn active(&self) -> usize {
        self.lock().len()
    }

    async fn pump(&self, correlation_id: String, epoch: u64, mut events: impl ProcessEvents) {
        loop {
            match events.next_event().await {
                Some(ProcessEvent::Stdout(message)) => {
                    self.publish(
                        &correlation_id,
                        epoch,
                        StreamRecord::Log {
                            kind: LogKind::Stdout,
                            message,
                        },
                    );
                }
                Some(ProcessEvent::Stderr(message)) => {
                    self.publish(
                        &correlation_id,
                        epoch,
                        StreamRecord::Log {
                            kind: LogKind::Stderr,
                            message,
                        },
                    );
                }
                Some(ProcessEvent::SpawnFailed(message)) => {
                    warn!(correlation_id = %correlation_id, error = %message, "process spawn failed");
                    self.publish(
                        &correlation_id,
                        epoch,
                        StreamRecord::Log {
                            kind: LogKind::Error,
                            message,
                        },
                    );
                    self.finish(&correlation_id, epoch, StreamState::Failed, None);
                    return;
                }
                Some(ProcessEvent::Exited(code)) => {
                    let state = if code == Some(0) {
                        StreamState::Completed
                    } else {
                        StreamState::Failed
                    };
                    self.finish(&correlation_id, epoch, state, code);
                    return;
                }
                None => {
                    // Source dropped without a termination event.
                    warn!(correlation_id = %correlation_id, "process event source ended abnormally");
                    self.finish(&correlation_id, epoch, StreamState::Failed, None);
                    return;
                }
            }
        }
    }

    fn publish(&self, correlation_id: &str, epoch: u64, record: StreamRecord) {
        let mut channels = self.lock();
        let Some(channel) = channels.get_mut(correlation_id) else {
            debug!(correlation_id, "record for removed channel; ignoring");
            return;
        };
        if channel.epoch != epoch {
            debug!(correlation_id, "stale record from previous binding; ignoring");
            return;
        }
        Self::deliver(channel, correlation_id, record);
    }

    /// Publish the terminal `Status` and `Complete` records, then remove the
    /// channel entry. Done under one lock so a concurrent subscriber sees
    /// either the live terminal records or the immediate notice, never both.
    fn finish(
        &self,
        correlation_id: &str,
        epoch: u64,
        state: StreamState,
        exit_code: Option<i32>,
    ) {
        let mut channels = self.lock();
        let Some(channel) = channels.get_mut(correlation_id) else {
            return;
        };
        if channel.epoch != epoch {
            return;
        }
        Self::deliver(
            channel,
            correlation_id,
            StreamRecord::Status { state, exit_code },
        );
        Self::deliver(channel, correlation_id, StreamRecord::Complete);
        channels.remove(correlation_id);
        info!(correlation_id, ?state, "correlation channel closed");
    }

    fn deliver(channel: &mut Channel, correlation_id: &str, record: StreamRecord) {
        channel.buffer.push(record.clone());
        channel.subscribers.retain(|tx| {
            tx.send(StreamUpdate {
                correlation_id: correlation_id.to_string(),
                record: record.clone(),
            })
            .is_ok()
        });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn double_bind_is_rejected() {
        let registry = CorrelationRegistry::new();
        let (_tx1, rx1) = mpsc::channel::<ProcessEvent>(8);
        let (_tx2, rx2) = mpsc::channel::<ProcessEvent>(8);

        registry.bind("run-2", rx1).unwrap();
        let err = registry.bind("run-2", rx2).unwrap_err();
        assert!(matches!(err, PipelineError::CorrelationInUse(id) if id == "run-2"));
    }

    #[tokio::test]
    async fn unknown_id_gets_immediate_terminal_notice() {
        let registry = CorrelationRegistry::new();
        let mut sub = registry.subscribe("never-bound");

        let update = sub.recv().await.unwrap();
        assert_eq!(update.record, StreamRecord::Complete);
        assert!(sub.recv().await.is_none());
    }
}
