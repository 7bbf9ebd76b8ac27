// src/dag/pipeline.rs

//! The DAG scheduler: drives task lifecycles over the node graph, keeps the
//! aggregate status queryable, and fans node updates out to observers.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dag::graph::PipelineGraph;
use crate::dag::node::{NodeId, NodeSnapshot, ObserverId, TaskNode};
use crate::errors::{PipelineError, Result};
use crate::task::runnable::{RunnableTask, TaskLog};
use crate::task::runner::TaskRunner;
use crate::task::state::TaskResults;
use crate::types::{RunnableStatus, TaskOutcome};

#[derive(Debug, Clone, Serialize)]
pub struct PipelineMetadata {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Aggregate state of a whole pipeline, mirroring the two-axis task state.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub status: RunnableStatus,
    pub run_state: RunnableStatus,
}

/// Options for one execution pass.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Attempts per node before it is recorded as failed.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_delay: Duration::from_secs(3),
        }
    }
}

/// Serializable snapshot of the whole pipeline; nodes are listed in
/// topological order. Suitable for verbatim persistence or transmission.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub status: PipelineState,
    pub metadata: PipelineMetadata,
    pub nodes: Vec<NodeSnapshot>,
}

/// Events sent back into the scheduler loop from spawned node executions.
enum ExecEvent {
    /// A node's task state changed mid-run (log append or transition).
    Update(NodeId),
    /// A node reached a terminal state; the runner comes home with it.
    Finished {
        node: NodeId,
        runner: TaskRunner,
        outcome: TaskOutcome,
    },
}

type PipelineObserver = Box<dyn Fn(&Pipeline) + Send + Sync>;

/// A conformance-test pipeline: task-bearing nodes wired into a DAG, plus
/// the scheduler that executes them in dependency order.
///
/// Construction phase: `add_task`/`add_node` + `add_dependency`. The graph
/// seals when the first run begins; edges are fixed from then on. `reset`
/// returns every node to `NotStarted` so the same graph can run again.
pub struct Pipeline {
    metadata: PipelineMetadata,
    graph: PipelineGraph,
    state: PipelineState,
    observers: Vec<(ObserverId, PipelineObserver)>,
    next_observer: u64,
    cancel: CancellationToken,
    running: bool,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: PipelineMetadata {
                id: Uuid::new_v4(),
                name: name.into(),
                description: None,
            },
            graph: PipelineGraph::new(),
            state: PipelineState {
                status: RunnableStatus::NotStarted,
                run_state: RunnableStatus::NotStarted,
            },
            observers: Vec::new(),
            next_observer: 0,
            cancel: CancellationToken::new(),
            running: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    pub fn metadata(&self) -> &PipelineMetadata {
        &self.metadata
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Wrap a task implementation in a runner and add it as a node.
    pub fn add_task(&mut self, task: impl RunnableTask + 'static) -> Result<NodeId> {
        self.add_node(TaskRunner::new(Box::new(task)))
    }

    pub fn add_node(&mut self, runner: TaskRunner) -> Result<NodeId> {
        let id = self.graph.insert(TaskNode::new(runner))?;
        debug!(pipeline = %self.metadata.name, node = %id, "node added");
        Ok(id)
    }

    /// Make `node` depend on `dep`. See
    /// [`PipelineGraph::add_dependency`] for the failure modes.
    pub fn add_dependency(&mut self, node: NodeId, dep: NodeId) -> Result<()> {
        self.graph.add_dependency(node, dep)?;
        self.emit();
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<&TaskNode> {
        self.graph.node(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.graph.iter()
    }

    /// Nodes with no dependencies.
    pub fn roots(&self) -> Vec<NodeId> {
        self.graph.roots()
    }

    /// Register an observer on a single node.
    pub fn observe_node(
        &mut self,
        id: NodeId,
        observer: impl Fn(&TaskNode) + Send + Sync + 'static,
    ) -> Result<ObserverId> {
        Ok(self.graph.node_mut(id)?.on_update(observer))
    }

    pub fn unobserve_node(&mut self, id: NodeId, observer: ObserverId) -> Result<bool> {
        Ok(self.graph.node_mut(id)?.remove_observer(observer))
    }

    /// Register a pipeline-level observer, fired after any node update has
    /// been propagated.
    pub fn on_update(&mut self, observer: impl Fn(&Pipeline) + Send + Sync + 'static) -> ObserverId {
        let id = ObserverId::new(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    /// Synchronously invoke every pipeline observer.
    pub fn emit(&self) {
        for (_, observer) in &self.observers {
            observer(self);
        }
    }

    /// Token observed by the scheduler loop; cancelling it stops further
    /// dispatch while in-flight nodes drain.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Advisory stop for one node; in-flight external work is only halted if
    /// the task implementation forwards the signal.
    pub async fn stop_node(&mut self, id: NodeId) -> Result<()> {
        {
            let node = self.graph.node_mut(id)?;
            match node.runner_mut() {
                Some(runner) => runner.stop().await,
                // Checked out into a live execution; freeze the shared state.
                None => node.shared_state().stop(),
            }
        }
        self.graph.propagate_update(id);
        self.emit();
        Ok(())
    }

    /// Execute the pipeline: topological waves of dependency-eligible nodes,
    /// started concurrently, driven to terminal states.
    ///
    /// Nodes that are already in a successful terminal state (e.g. from an
    /// earlier pass) satisfy their dependents without re-running. Returns
    /// the aggregate status.
    pub async fn run(&mut self, options: RunOptions) -> Result<RunnableStatus> {
        if self.running {
            return Err(PipelineError::AlreadyRunning);
        }
        if self.graph.is_empty() {
            info!(pipeline = %self.metadata.name, "no nodes to run");
            return Ok(self.state.status);
        }

        self.running = true;
        self.graph.seal();
        self.state.status = RunnableStatus::Running;
        self.state.run_state = RunnableStatus::Running;
        info!(pipeline = %self.metadata.name, "pipeline run started");

        // Fresh nodes participate in this run.
        let ids: Vec<NodeId> = self.graph.ids().collect();
        for id in &ids {
            let node = self.graph.node(*id)?;
            if node.status() == RunnableStatus::NotStarted {
                node.shared_state().set_status(RunnableStatus::Pending);
                node.emit();
            }
        }
        self.emit();

        let (tx, mut rx) = mpsc::unbounded_channel::<ExecEvent>();
        let mut in_flight = self.dispatch_ready(&tx, &options);

        while in_flight > 0 {
            let Some(event) = rx.recv().await else {
                break;
            };
            match event {
                ExecEvent::Update(node) => {
                    self.graph.propagate_update(node);
                    self.emit();
                }
                ExecEvent::Finished {
                    node,
                    runner,
                    outcome,
                } => {
                    in_flight -= 1;
                    if let Ok(n) = self.graph.node_mut(node) {
                        n.check_in_runner(runner);
                    }
                    self.graph.propagate_update(node);
                    self.emit();

                    if outcome == TaskOutcome::Failed {
                        self.mark_dependents_skipped(node);
                    }
                    in_flight += self.dispatch_ready(&tx, &options);
                }
            }
        }
        drop(tx);

        self.state.status = self.aggregate_status();
        // A cancelled pass that left nodes behind did not complete; keep the
        // phase axis consistent with the non-terminal aggregate.
        self.state.run_state = if self.cancel.is_cancelled() && !self.state.status.is_terminal()
        {
            RunnableStatus::Pending
        } else {
            RunnableStatus::Completed
        };
        self.running = false;
        self.emit();
        info!(
            pipeline = %self.metadata.name,
            status = %self.state.status,
            "pipeline run finished"
        );
        Ok(self.state.status)
    }

    /// Snapshot of aggregate status, metadata and all node snapshots in
    /// topological order. Contains no live references.
    pub fn serialize(&self) -> PipelineSnapshot {
        let nodes = self
            .graph
            .topo_order()
            .into_iter()
            .filter_map(|id| self.graph.node(id).ok())
            .map(TaskNode::snapshot)
            .collect();
        PipelineSnapshot {
            status: self.state,
            metadata: self.metadata.clone(),
            nodes,
        }
    }

    /// Return every node to `NotStarted` with cleared logs and results.
    /// Edges are kept, so the pipeline can run again without being rebuilt.
    pub fn reset(&mut self) -> Result<()> {
        let ids: Vec<NodeId> = self.graph.ids().collect();
        self.reset_ids(&ids)
    }

    /// Reset one node, plus every transitive dependent that was `Skipped`
    /// because of it, back to `NotStarted`. Other nodes keep their state, so
    /// a later [`run`](Self::run) re-invokes just this subtree while
    /// completed siblings keep satisfying their dependents.
    pub fn reset_node(&mut self, id: NodeId) -> Result<()> {
        let mut targets = vec![id];
        // Skipped regions are contiguous below the node that caused them.
        let mut stack: Vec<NodeId> = self.graph.node(id)?.dependents().to_vec();
        let mut visited: std::collections::HashSet<NodeId> = std::collections::HashSet::new();
        visited.insert(id);
        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            let Ok(node) = self.graph.node(next) else {
                continue;
            };
            if node.status() == RunnableStatus::Skipped {
                targets.push(next);
                stack.extend(node.dependents().iter().copied());
            }
        }
        self.reset_ids(&targets)
    }

    fn reset_ids(&mut self, ids: &[NodeId]) -> Result<()> {
        if self.running {
            return Err(PipelineError::AlreadyRunning);
        }
        for id in ids {
            let node = self.graph.node_mut(*id)?;
            match node.runner_mut() {
                Some(runner) => runner.reset(),
                None => return Err(PipelineError::AlreadyRunning),
            }
            node.clear_results();
            self.graph.propagate_update(*id);
        }
        self.state.status = RunnableStatus::NotStarted;
        self.state.run_state = RunnableStatus::NotStarted;
        self.cancel = CancellationToken::new();
        self.emit();
        Ok(())
    }

    /// Launch every `Pending` node whose dependencies have all reached a
    /// successful terminal state. Returns how many were dispatched.
    fn dispatch_ready(
        &mut self,
        tx: &mpsc::UnboundedSender<ExecEvent>,
        options: &RunOptions,
    ) -> usize {
        if self.cancel.is_cancelled() {
            debug!(pipeline = %self.metadata.name, "cancelled; not dispatching");
            return 0;
        }

        let ready: Vec<NodeId> = self
            .graph
            .iter()
            .filter(|node| {
                node.status() == RunnableStatus::Pending && self.deps_satisfied(node)
            })
            .map(TaskNode::id)
            .collect();

        let mut dispatched = 0;
        for id in ready {
            // Dependency results, in dependency order, as the node's input.
            let input: Vec<TaskResults> = {
                let node = match self.graph.node(id) {
                    Ok(n) => n,
                    Err(_) => continue,
                };
                node.dependencies()
                    .iter()
                    .filter_map(|dep| self.graph.node(*dep).ok())
                    .filter_map(|dep| dep.results().cloned())
                    .collect()
            };

            let Ok(node) = self.graph.node_mut(id) else {
                continue;
            };
            let Some(mut runner) = node.check_out_runner() else {
                warn!(node = %id, "runner already checked out; skipping dispatch");
                continue;
            };

            let signal_tx = tx.clone();
            let log = TaskLog::with_signal(
                runner.shared_state(),
                Arc::new(move || {
                    let _ = signal_tx.send(ExecEvent::Update(id));
                }),
            );

            debug!(node = %id, "dispatching node");
            let events_tx = tx.clone();
            let max_attempts = options.max_attempts;
            let retry_delay = options.retry_delay;
            tokio::spawn(async move {
                let outcome = runner.execute(&log, &input, max_attempts, retry_delay).await;
                let _ = events_tx.send(ExecEvent::Finished {
                    node: id,
                    runner,
                    outcome,
                });
            });
            dispatched += 1;
        }
        dispatched
    }

    fn deps_satisfied(&self, node: &TaskNode) -> bool {
        node.dependencies().iter().all(|dep| {
            self.graph
                .node(*dep)
                .map(|d| d.status().is_success())
                .unwrap_or(false)
        })
    }

    /// Mark every transitive dependent of a failed node as `Skipped`: forced
    /// terminal failure without ever invoking their task logic, recorded
    /// distinctly from a node that failed on its own.
    fn mark_dependents_skipped(&mut self, failed: NodeId) {
        let failed_name = self
            .graph
            .node(failed)
            .map(|n| n.name().to_string())
            .unwrap_or_else(|_| failed.to_string());

        let mut stack: Vec<NodeId> = self
            .graph
            .node(failed)
            .map(|n| n.dependents().to_vec())
            .unwrap_or_default();

        while let Some(id) = stack.pop() {
            let Ok(node) = self.graph.node(id) else {
                continue;
            };
            if node.status().is_terminal() {
                continue;
            }
            let state = node.shared_state();
            state.push_message(format!(
                "skipped: upstream dependency '{failed_name}' failed"
            ));
            state.set_status(RunnableStatus::Skipped);
            warn!(node = %id, upstream = %failed_name, "node skipped due to upstream failure");

            stack.extend(node.dependents().iter().copied());
            self.graph.propagate_update(id);
        }
        self.emit();
    }

    fn aggregate_status(&self) -> RunnableStatus {
        let mut all_success = true;
        for node in self.graph.iter() {
            let status = node.status();
            if matches!(status, RunnableStatus::Failed | RunnableStatus::Skipped) {
                return RunnableStatus::Failed;
            }
            if !status.is_success() {
                all_success = false;
            }
        }
        if all_success {
            RunnableStatus::Passed
        } else {
            // A cancelled pass leaves non-terminal nodes behind.
            RunnableStatus::Pending
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("metadata", &self.metadata)
            .field("state", &self.state)
            .field("nodes", &self.graph.len())
            .finish()
    }
}
