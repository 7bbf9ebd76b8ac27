// src/dag/node.rs

//! Task-bearing graph nodes: identity, dependency bookkeeping and the local
//! observer registry. Nodes know nothing about scheduling.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::task::runner::TaskRunner;
use crate::task::state::{SharedTaskState, TaskMetadata, TaskResults, TaskSnapshot, TaskState};
use crate::types::RunnableStatus;

/// Opaque node identifier, generated at construction, immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(Uuid);

impl NodeId {
    pub(crate) fn new() -> Self {
        NodeId(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Token returned by observer registration; used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

impl ObserverId {
    pub(crate) fn new(value: u64) -> Self {
        ObserverId(value)
    }
}

type NodeObserver = Box<dyn Fn(&TaskNode) + Send + Sync>;

/// A graph node carrying a [`TaskRunner`].
///
/// Dependencies and dependents are handle lists into the owning
/// [`PipelineGraph`](crate::dag::graph::PipelineGraph); the `dependents`
/// side is a non-owning back-reference index maintained automatically when
/// an edge is added.
///
/// While the pipeline executes this node, the runner is checked out into the
/// spawned execution; the node keeps a clone of the shared task state so
/// snapshots and observers keep working mid-flight.
pub struct TaskNode {
    id: NodeId,
    metadata: TaskMetadata,
    deps: Vec<NodeId>,
    dependents: Vec<NodeId>,
    observers: Vec<(ObserverId, NodeObserver)>,
    next_observer: u64,
    state: SharedTaskState,
    runner: Option<TaskRunner>,
    results: Option<TaskResults>,
}

impl TaskNode {
    pub fn new(runner: TaskRunner) -> Self {
        Self {
            id: NodeId::new(),
            metadata: runner.metadata().clone(),
            deps: Vec::new(),
            dependents: Vec::new(),
            observers: Vec::new(),
            next_observer: 0,
            state: runner.shared_state(),
            runner: Some(runner),
            results: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn description(&self) -> Option<&str> {
        self.metadata.description.as_deref()
    }

    /// Direct dependencies, in insertion order.
    pub fn dependencies(&self) -> &[NodeId] {
        &self.deps
    }

    /// Direct dependents (nodes that depend on this one).
    pub fn dependents(&self) -> &[NodeId] {
        &self.dependents
    }

    pub fn status(&self) -> RunnableStatus {
        self.state.status()
    }

    pub fn run_state(&self) -> RunnableStatus {
        self.state.run_state()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    pub fn task_state(&self) -> TaskState {
        self.state.snapshot()
    }

    /// Results of the last completed run, if any.
    pub fn results(&self) -> Option<&TaskResults> {
        self.results.as_ref()
    }

    /// Register an update observer. No dedup; observers fire in registration
    /// order.
    pub fn on_update(&mut self, observer: impl Fn(&TaskNode) + Send + Sync + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Remove a previously registered observer. Returns whether it existed.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    /// Synchronously invoke every observer with this node as argument.
    ///
    /// Does not recurse into dependents or dependencies; cross-graph
    /// propagation is the pipeline's responsibility.
    pub fn emit(&self) {
        for (_, observer) in &self.observers {
            observer(self);
        }
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let task = TaskSnapshot {
            id: self.metadata.id,
            metadata: self.metadata.clone(),
            state: self.state.snapshot(),
        };
        NodeSnapshot {
            id: self.id,
            name: self.metadata.name.clone(),
            description: self.metadata.description.clone(),
            state: task.state.run_state,
            finished: task.state.status.is_terminal(),
            stopped: task.state.stopped,
            task,
        }
    }

    pub(crate) fn push_dependency(&mut self, dep: NodeId) {
        self.deps.push(dep);
    }

    pub(crate) fn push_dependent(&mut self, dependent: NodeId) {
        self.dependents.push(dependent);
    }

    pub(crate) fn shared_state(&self) -> SharedTaskState {
        self.state.clone()
    }

    pub(crate) fn check_out_runner(&mut self) -> Option<TaskRunner> {
        self.runner.take()
    }

    pub(crate) fn check_in_runner(&mut self, runner: TaskRunner) {
        self.results = runner.take_results();
        self.runner = Some(runner);
    }

    pub(crate) fn runner_mut(&mut self) -> Option<&mut TaskRunner> {
        self.runner.as_mut()
    }

    pub(crate) fn clear_results(&mut self) {
        self.results = None;
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("name", &self.metadata.name)
            .field("deps", &self.deps)
            .field("dependents", &self.dependents)
            .field("status", &self.status())
            .finish()
    }
}

/// Serializable node snapshot, shaped for remote observers.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Phase of the carried task (mirrors `task.state.runState`).
    pub state: RunnableStatus,
    pub finished: bool,
    pub stopped: bool,
    pub task: TaskSnapshot,
}
