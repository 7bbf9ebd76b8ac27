// src/dag/mod.rs

//! The node graph and the scheduler that drives it.

pub mod graph;
pub mod node;
pub mod pipeline;

pub use graph::PipelineGraph;
pub use node::{NodeId, NodeSnapshot, ObserverId, TaskNode};
pub use pipeline::{Pipeline, PipelineMetadata, PipelineSnapshot, PipelineState, RunOptions};
