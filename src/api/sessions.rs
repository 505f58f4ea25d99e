/// Session control endpoints
///
/// Start, stop, inspect and poke flow sessions; reload a flow definition into
/// the registry; re-run bootstrap reconciliation on demand.

use crate::{
    api::{error::ApiError, AppState},
    runtime::{
        bootstrap::ReconcileReport,
        parameters::ParameterValidation,
        session::{SessionStatus, StartOptions, TickOutcome},
    },
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `POST /api/flows/{id}/start`
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub scan_rate_ms: Option<u64>,
}

/// Body of `PUT /api/flows/{id}/parameters`
#[derive(Debug, Deserialize)]
pub struct ParametersRequest {
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub sessions: Vec<SessionStatus>,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub flow_id: String,
    pub loaded: bool,
    /// Set when the flow disappeared and its session was stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_session: Option<SessionStatus>,
}

pub fn create_session_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sessions", get(list_sessions))
        .route("/api/flows/{id}/start", post(start_flow))
        .route("/api/flows/{id}/stop", post(stop_flow))
        .route("/api/flows/{id}/status", get(flow_status))
        .route("/api/flows/{id}/tick", post(tick_flow))
        .route("/api/flows/{id}/parameters", put(update_parameters))
        .route("/api/flows/{id}/reload", post(reload_flow))
        .route("/api/bootstrap/reconcile", post(reconcile))
}

/// GET /api/sessions
async fn list_sessions(State(state): State<AppState>) -> Json<SessionList> {
    Json(SessionList {
        sessions: state.sessions.list().await,
    })
}

/// POST /api/flows/{id}/start
/// Body: { "parameters": { ... }, "scan_rate_ms": 500 }
async fn start_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Json(request): Json<StartRequest>,
) -> Result<Json<SessionStatus>, ApiError> {
    let options = StartOptions {
        parameters: request.parameters,
        scan_rate_ms: request.scan_rate_ms,
        job_id: None,
    };
    let status = state.sessions.start(&flow_id, options).await?;
    tracing::info!("▶️ Started flow {} via API", flow_id);
    Ok(Json(status))
}

/// POST /api/flows/{id}/stop
async fn stop_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> Result<Json<SessionStatus>, ApiError> {
    Ok(Json(state.sessions.stop(&flow_id).await?))
}

/// GET /api/flows/{id}/status
async fn flow_status(State(state): State<AppState>, Path(flow_id): Path<String>) -> Json<SessionStatus> {
    Json(state.sessions.status(&flow_id).await)
}

/// POST /api/flows/{id}/tick
async fn tick_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> Result<Json<TickOutcome>, ApiError> {
    Ok(Json(state.sessions.tick_now(&flow_id).await?))
}

/// PUT /api/flows/{id}/parameters
/// Body: { "parameters": { ... } }
async fn update_parameters(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Json(request): Json<ParametersRequest>,
) -> Result<Json<ParameterValidation>, ApiError> {
    Ok(Json(
        state.sessions.update_parameters(&flow_id, request.parameters).await?,
    ))
}

/// POST /api/flows/{id}/reload
///
/// Re-reads the definition from storage. Running sessions keep the definition
/// they started with; a flow that no longer exists has its session stopped.
async fn reload_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let loaded = state.sessions.registry().reload_flow(&flow_id).await?;

    let stopped_session = if loaded.is_none() && state.sessions.is_running(&flow_id).await {
        tracing::info!("🗑️ Flow {} was deleted, stopping its session", flow_id);
        Some(state.sessions.stop(&flow_id).await?)
    } else {
        None
    };

    Ok(Json(ReloadResponse {
        flow_id,
        loaded: loaded.is_some(),
        stopped_session,
    }))
}

/// POST /api/bootstrap/reconcile
async fn reconcile(State(state): State<AppState>) -> Result<Json<ReconcileReport>, ApiError> {
    Ok(Json(state.reconciler.reconcile().await?))
}
