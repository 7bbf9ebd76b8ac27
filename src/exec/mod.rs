// src/exec/mod.rs

//! Shell process execution for pipeline tasks.

pub mod command;
pub mod shell_task;

pub use command::spawn_shell;
pub use shell_task::ShellTask;
