// src/task/mod.rs

//! Task lifecycle: the opaque [`RunnableTask`] contract, the state attached
//! to a unit of work, and the [`TaskRunner`] state machine that drives it.

pub mod runnable;
pub mod runner;
pub mod simple;
pub mod state;

pub use runnable::{RunnableTask, TaskLog};
pub use runner::TaskRunner;
pub use simple::SimpleTask;
pub use state::{SharedTaskState, TaskMetadata, TaskResults, TaskSnapshot, TaskState};
