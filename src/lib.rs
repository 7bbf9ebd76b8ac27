// src/lib.rs

//! Pipeline orchestration for conformance-test runs.
//!
//! A [`Pipeline`] is a directed acyclic graph of task-bearing nodes. Each
//! node wraps a [`RunnableTask`] behind a shared lifecycle state that
//! observers can watch live; the scheduler dispatches every node whose
//! dependencies have succeeded, feeds it the results of those dependencies,
//! and skips the subtree below any failure. Output from external processes
//! is fanned out to subscribers by correlation id through a
//! [`CorrelationRegistry`].

pub mod dag;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod stream;
pub mod task;
pub mod types;

pub use crate::dag::{NodeId, ObserverId, Pipeline, PipelineGraph, RunOptions, TaskNode};
pub use crate::errors::{PipelineError, Result};
pub use crate::exec::{ShellTask, spawn_shell};
pub use crate::stream::{CorrelationRegistry, StreamRecord, StreamUpdate};
pub use crate::task::{RunnableTask, SimpleTask, TaskLog, TaskResults, TaskRunner};
pub use crate::types::{RunnableStatus, TaskOutcome};
