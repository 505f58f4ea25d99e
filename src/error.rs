/// Typed errors for the parts of the engine whose callers branch on the failure
///
/// Orchestration code (storage, queue, server wiring) stays on `anyhow::Result`;
/// these enums cover trigger evaluation, session lifecycle, and live publishing.

use thiserror::Error;

/// Errors raised while compiling or evaluating a trigger expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TriggerError {
    /// The expression is syntactically malformed or references something unbound.
    #[error("invalid trigger expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// The expression contains a denied token (process, module or global access).
    #[error("trigger expression '{expression}' uses forbidden token '{token}'")]
    Forbidden { expression: String, token: String },
}

impl TriggerError {
    pub(crate) fn invalid(expression: &str, reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the session manager.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session already running for flow '{0}'")]
    AlreadyRunning(String),

    #[error("no running session for flow '{0}'")]
    NotRunning(String),

    #[error("flow '{0}' not found")]
    FlowNotFound(String),

    #[error("invalid runtime parameters: {}", .0.join("; "))]
    InvalidParameters(Vec<String>),

    #[error("flow '{flow_id}' has an invalid graph: {reason}")]
    InvalidGraph { flow_id: String, reason: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Errors raised by the live update bus.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("no subscribers on topic '{0}'")]
    NoSubscribers(String),
}
