/// Edit-time validation endpoints
///
/// Lets external editors check trigger expressions and parameter values before
/// they are stored or used to start a flow.

use crate::{
    api::{error::ApiError, AppState},
    runtime::{
        parameters::{ParameterInjector, ParameterValidation},
        trigger::{TriggerEvaluator, TriggerValidation},
    },
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub expression: String,
}

#[derive(Debug, Deserialize)]
pub struct ParameterCheckRequest {
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

pub fn create_validation_routes() -> Router<AppState> {
    Router::new()
        .route("/api/triggers/validate", post(validate_trigger))
        .route("/api/flows/{id}/parameters/validate", post(validate_parameters))
}

/// POST /api/triggers/validate
/// Body: { "expression": "$input.temp > 100" }
async fn validate_trigger(Json(request): Json<TriggerRequest>) -> Json<TriggerValidation> {
    Json(TriggerEvaluator::validate(&request.expression))
}

/// POST /api/flows/{id}/parameters/validate
/// Body: { "parameters": { ... } }
async fn validate_parameters(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Json(request): Json<ParameterCheckRequest>,
) -> Result<Json<ParameterValidation>, ApiError> {
    let flow = state
        .sessions
        .registry()
        .get_or_load(&flow_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("flow '{flow_id}' not found")))?;

    Ok(Json(ParameterInjector::validate(&flow.parameters, &request.parameters)))
}
