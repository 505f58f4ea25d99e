/// HTTP control API
///
/// This module provides the REST endpoints that drive the execution engine.
/// Flow CRUD stays with external collaborators. It handles:
/// - Session start/stop/status, on-demand scans and parameter overrides
/// - Edit-time trigger and parameter validation
/// - Execution log queries
/// - On-demand bootstrap reconciliation

use crate::runtime::{bootstrap::BootstrapReconciler, log_storage::LogStorage, session::SessionManager};
use axum::Router;

// Error type with HTTP status mapping
pub mod error;

// Session lifecycle endpoints
pub mod sessions;

// Trigger and parameter validation endpoints
pub mod validation;

// Execution log queries
pub mod logs;

pub use error::ApiError;

/// Shared state of every control endpoint
#[derive(Clone)]
pub struct AppState {
    /// Owner of all running sessions (and the flow registry)
    pub sessions: SessionManager,
    /// Execution log reads
    pub logs: LogStorage,
    /// On-demand reconciliation
    pub reconciler: BootstrapReconciler,
}

/// All control routes, ready for `with_state`
pub fn create_control_routes() -> Router<AppState> {
    Router::new()
        .merge(sessions::create_session_routes())
        .merge(validation::create_validation_routes())
        .merge(logs::create_log_routes())
}
