/// Execution log query endpoint

use crate::{
    api::{error::ApiError, AppState},
    runtime::log_sink::LogEntry,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

const DEFAULT_LIMIT: i64 = 200;
const MAX_LIMIT: i64 = 5_000;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct LogPage {
    pub flow_id: String,
    pub entries: Vec<LogEntry>,
}

pub fn create_log_routes() -> Router<AppState> {
    Router::new().route("/api/flows/{id}/logs", get(flow_logs))
}

/// GET /api/flows/{id}/logs?limit=200
///
/// The newest `limit` entries, oldest first.
async fn flow_logs(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogPage>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if limit <= 0 {
        return Err(ApiError::BadRequest("limit must be positive".to_string()));
    }

    let entries = state.logs.fetch_for_flow(&flow_id, limit.min(MAX_LIMIT)).await?;
    Ok(Json(LogPage { flow_id, entries }))
}
