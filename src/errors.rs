// src/errors.rs

//! Crate-wide error types.

use thiserror::Error;

use crate::dag::node::NodeId;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("node {0} cannot depend on itself")]
    SelfDependency(NodeId),

    #[error("adding dependency {dependency} to node {node} would create a cycle")]
    Cycle { node: NodeId, dependency: NodeId },

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("graph is sealed; dependencies cannot change once a run has started")]
    GraphSealed,

    #[error("pipeline run already in progress")]
    AlreadyRunning,

    #[error("task preparation failed: {0}")]
    Preparation(String),

    #[error("task has no results yet")]
    NoResults,

    #[error("correlation id '{0}' is already bound to an active process")]
    CorrelationInUse(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipelineError>;
