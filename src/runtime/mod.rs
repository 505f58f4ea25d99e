/// Continuous flow execution runtime
///
/// This module drives already-validated flow graphs. It handles:
/// - Per-session input state that survives between scan cycles
/// - Sandboxed trigger expressions gating node execution
/// - Batched, strictly ordered execution logging
/// - Runtime parameter injection into per-run copies of a flow
/// - Session lifecycle, scan timers and post-restart reconciliation

// Latest value per (node, port) for one running flow
pub mod state_cache;

// Restricted boolean expression language: lexer, parser, evaluator
pub mod trigger;

// SQLite persistence for execution log entries
pub mod log_storage;

// Batching, ordering and live publishing of execution log entries
pub mod log_sink;

// Parameter schema validation and injection
pub mod parameters;

// Node handler seam and built-in node types
pub mod executor;

// Petgraph execution plans and the scan cycle
pub mod engine;

// Session manager: one session per running flow
pub mod session;

// Deployed-flow reconciliation after restart
pub mod bootstrap;

// Periodic purge of expired execution logs
pub mod retention;

// Re-export main types
pub use bootstrap::{BootstrapReconciler, ReconcileReport};
pub use engine::{ExecutionEngine, ExecutionPlan, TickReport};
pub use executor::{NodeExecutor, NodeHandler, NodeOutput};
pub use log_sink::{ExecutionLogSink, LogEntry, LogLevel};
pub use parameters::{ParameterInjector, ParameterValidation};
pub use session::{SessionManager, SessionState, SessionStatus, StartOptions, TickOutcome};
pub use state_cache::InputStateCache;
pub use trigger::{TriggerEvaluator, TriggerValidation};
