// src/stream/mod.rs

//! Correlated process output streaming.

pub mod record;
pub mod registry;

pub use record::{LogKind, ProcessEvent, ProcessEvents, StreamRecord, StreamState, StreamUpdate};
pub use registry::CorrelationRegistry;
