/// Scanflow: continuous flow execution engine
///
/// This library keeps a population of dataflow graphs running on their own scan
/// schedules, with per-node input continuity, sandboxed trigger expressions,
/// strictly ordered execution logging and restart reconciliation.

// Core configuration and setup
pub mod config;

// Typed domain errors
pub mod error;

// SQLite pool and schema
pub mod database;

// Flow definitions - types, storage and the hot-reload registry
pub mod flow;

// Per-flow live update fan-out
pub mod bus;

// Runtime execution engine - sessions, scan cycles, triggers, logging
pub mod runtime;

// Work queue records and the worker that starts sessions
pub mod queue;

// HTTP control API
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{BusError, SessionError, TriggerError};
pub use flow::{Edge, ExecutionMode, Flow, Node, PortValue, Quality};
pub use runtime::{NodeExecutor, NodeHandler, NodeOutput, SessionManager, SessionState, StartOptions};
pub use server::start_server;
