// src/dag/graph.rs

//! Arena of task-bearing nodes plus the dependency relation between them.
//!
//! Nodes are owned by the graph and addressed by [`NodeId`] handles, so the
//! `dependents` back-reference is a plain index with no ownership cycles.
//! Acyclicity is enforced incrementally at edge-insertion time.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::node::{NodeId, TaskNode};
use crate::errors::{PipelineError, Result};

pub struct PipelineGraph {
    nodes: HashMap<NodeId, TaskNode>,
    /// Insertion order, for deterministic iteration.
    order: Vec<NodeId>,
    /// Set once the first execution pass begins; edge and node mutation is
    /// rejected afterwards.
    sealed: bool,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            sealed: false,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn insert(&mut self, node: TaskNode) -> Result<NodeId> {
        if self.sealed {
            return Err(PipelineError::GraphSealed);
        }
        let id = node.id();
        self.nodes.insert(id, node);
        self.order.push(id);
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Result<&TaskNode> {
        self.nodes.get(&id).ok_or(PipelineError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut TaskNode> {
        self.nodes.get_mut(&id).ok_or(PipelineError::UnknownNode(id))
    }

    /// Nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.order.iter().copied()
    }

    /// Nodes with no dependencies.
    pub fn roots(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|n| n.dependencies().is_empty())
            .map(|n| n.id())
            .collect()
    }

    /// Make `node` depend on `dep`.
    ///
    /// Fails with `SelfDependency` when the two are the same node, and with
    /// `Cycle` when `node` is already reachable from `dep` along dependency
    /// edges (checked by a reachability walk over `dep`'s subgraph, so the
    /// cost is proportional to what `dep` can reach, not the whole graph).
    /// On failure no edge is added. On success the modified node's own
    /// update is emitted.
    pub fn add_dependency(&mut self, node: NodeId, dep: NodeId) -> Result<()> {
        if self.sealed {
            return Err(PipelineError::GraphSealed);
        }
        if node == dep {
            return Err(PipelineError::SelfDependency(node));
        }
        if !self.nodes.contains_key(&node) {
            return Err(PipelineError::UnknownNode(node));
        }
        if !self.nodes.contains_key(&dep) {
            return Err(PipelineError::UnknownNode(dep));
        }
        if self.reaches(dep, node) {
            return Err(PipelineError::Cycle {
                node,
                dependency: dep,
            });
        }

        if let Some(n) = self.nodes.get_mut(&node) {
            n.push_dependency(dep);
        }
        if let Some(d) = self.nodes.get_mut(&dep) {
            d.push_dependent(node);
        }

        debug!(%node, %dep, "dependency edge added");

        // The modified node announces its own change; the dependency stays
        // silent.
        if let Some(n) = self.nodes.get(&node) {
            n.emit();
        }
        Ok(())
    }

    /// Depth-first reachability along dependency edges.
    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut stack = vec![from];
        let mut visited: HashSet<NodeId> = HashSet::new();

        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.dependencies().iter().copied());
            }
        }
        false
    }

    /// Emit on `origin`, then on every transitive dependent exactly once, in
    /// breadth-first order, so a subscriber on any ancestor learns of
    /// descendant changes.
    pub fn propagate_update(&self, origin: NodeId) {
        let Some(node) = self.nodes.get(&origin) else {
            return;
        };
        node.emit();

        let mut queue: VecDeque<NodeId> = node.dependents().iter().copied().collect();
        let mut visited: HashSet<NodeId> = HashSet::new();
        visited.insert(origin);

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(dependent) = self.nodes.get(&id) {
                dependent.emit();
                queue.extend(dependent.dependents().iter().copied());
            }
        }
    }

    /// Topological order of all nodes (dependencies first). The graph is
    /// acyclic by construction, so this cannot fail.
    pub fn topo_order(&self) -> Vec<NodeId> {
        let mut graph: DiGraphMap<NodeId, ()> = DiGraphMap::new();
        for id in &self.order {
            graph.add_node(*id);
        }
        for node in self.iter() {
            for dep in node.dependencies() {
                graph.add_edge(*dep, node.id(), ());
            }
        }
        match toposort(&graph, None) {
            Ok(order) => order,
            // Unreachable given edge-insertion checks; fall back to
            // insertion order rather than panicking.
            Err(_) => self.order.clone(),
        }
    }
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::new()
    }
}
