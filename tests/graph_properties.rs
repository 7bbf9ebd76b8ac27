// tests/graph_properties.rs

use std::collections::HashSet;

use proptest::prelude::*;

use certflow::dag::{NodeId, PipelineGraph, TaskNode};
use certflow::task::{SimpleTask, TaskRunner};

fn graph_with_nodes(count: usize) -> (PipelineGraph, Vec<NodeId>) {
    let mut graph = PipelineGraph::new();
    let ids = (0..count)
        .map(|i| {
            let runner = TaskRunner::new(Box::new(SimpleTask::new(format!("node_{i}"))));
            graph.insert(TaskNode::new(runner)).unwrap()
        })
        .collect();
    (graph, ids)
}

/// No node may reach itself by walking dependency edges.
fn is_acyclic(graph: &PipelineGraph) -> bool {
    graph.iter().all(|start| {
        let mut stack: Vec<NodeId> = start.dependencies().to_vec();
        let mut visited: HashSet<NodeId> = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == start.id() {
                return false;
            }
            if visited.insert(id) {
                if let Ok(node) = graph.node(id) {
                    stack.extend(node.dependencies().iter().copied());
                }
            }
        }
        true
    })
}

fn edge_count(graph: &PipelineGraph) -> usize {
    graph.iter().map(|n| n.dependencies().len()).sum()
}

proptest! {
    #[test]
    fn random_edge_insertions_never_create_a_cycle(
        node_count in 2..12usize,
        edges in proptest::collection::vec((any::<usize>(), any::<usize>()), 0..60),
    ) {
        let (mut graph, ids) = graph_with_nodes(node_count);

        for (from, to) in edges {
            let node = ids[from % node_count];
            let dep = ids[to % node_count];
            // Accepted or rejected, the graph must stay a DAG.
            let _ = graph.add_dependency(node, dep);
            prop_assert!(is_acyclic(&graph));
        }
    }

    #[test]
    fn rejected_edges_leave_the_graph_unchanged(
        node_count in 2..10usize,
        edges in proptest::collection::vec((any::<usize>(), any::<usize>()), 1..40),
    ) {
        let (mut graph, ids) = graph_with_nodes(node_count);

        for (from, to) in edges {
            let node = ids[from % node_count];
            let dep = ids[to % node_count];
            let before = edge_count(&graph);

            match graph.add_dependency(node, dep) {
                // Both sides of the edge are recorded.
                Ok(()) => prop_assert_eq!(edge_count(&graph), before + 1),
                Err(_) => prop_assert_eq!(edge_count(&graph), before),
            }
        }
    }

    #[test]
    fn dependency_and_dependent_sides_stay_symmetric(
        node_count in 2..10usize,
        edges in proptest::collection::vec((any::<usize>(), any::<usize>()), 0..40),
    ) {
        let (mut graph, ids) = graph_with_nodes(node_count);

        for (from, to) in edges {
            let _ = graph.add_dependency(ids[from % node_count], ids[to % node_count]);
        }

        for node in graph.iter() {
            for dep in node.dependencies() {
                let dep_node = graph.node(*dep).unwrap();
                prop_assert!(dep_node.dependents().contains(&node.id()));
            }
        }
    }
}
