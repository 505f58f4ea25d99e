/// Flow Definition Layer
///
/// Handles flow definitions as the engine consumes them:
/// - Type definitions (Flow, Node, Edge, parameter schema, port values)
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload registry using ArcSwap

// Core flow type definitions
pub mod types;

// SQLite persistence layer for flow definitions
pub mod storage;

// Hot-reload registry using ArcSwap for zero-downtime updates
pub mod registry;

// Re-export commonly used types
pub use registry::FlowRegistry;
pub use storage::FlowStorage;
pub use types::{
    Edge, ExecutionMode, Flow, Node, ParameterConstraints, ParameterDefinition, ParameterType,
    PortValue, Quality,
};
