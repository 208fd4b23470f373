use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::database::models::RankedPrediction;
use crate::database::PersistenceGateway;
use crate::forecast::{ModelInfo, ModelRegistry};
use crate::pipeline::{with_gateway, PipelineRunner, PipelineSummary};

use super::responses::*;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<dyn PipelineRunner>,
    pub gateway: Arc<PersistenceGateway>,
    pub registry: Arc<ModelRegistry>,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let pool = state.gateway.pool();
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        pool_in_use: pool.in_use(),
        pool_size: pool.max_size(),
        model_version: state.registry.snapshot().version,
    })
}

/// Run the prediction pipeline now and wait for it
///
/// Not gated by the scheduler: a manual run may overlap a scheduled one.
#[utoipa::path(
    post,
    path = "/api/v1/predictions/trigger",
    tag = "Predictions",
    responses(
        (status = 200, description = "Run completed", body = PipelineSummary)
    )
)]
pub async fn trigger_predictions(State(state): State<AppState>) -> Json<PipelineSummary> {
    tracing::info!("▶️  Manual prediction run requested");
    Json(state.runner.run().await)
}

/// List active predictions, biggest expected gain first
#[utoipa::path(
    get,
    path = "/api/v1/predictions",
    tag = "Predictions",
    responses(
        (status = 200, description = "Active predictions ordered by predicted_price - current_price", body = Vec<RankedPrediction>)
    )
)]
pub async fn list_predictions(State(state): State<AppState>) -> Json<Vec<RankedPrediction>> {
    let rows = with_gateway(&state.gateway, |gateway| Some(gateway.list_active_predictions()))
        .await
        .unwrap_or_default();
    Json(rows)
}

/// Get the prediction for one security
#[utoipa::path(
    get,
    path = "/api/v1/predictions/{security_id}",
    tag = "Predictions",
    params(
        ("security_id" = String, Path, description = "Exchange security identifier")
    ),
    responses(
        (status = 200, description = "Prediction details with expected move", body = PredictionDetail),
        (status = 404, description = "Security ID not found", body = ErrorResponse)
    )
)]
pub async fn get_prediction(
    State(state): State<AppState>,
    Path(security_id): Path<String>,
) -> Result<Json<PredictionDetail>, ApiError> {
    with_gateway(&state.gateway, move |gateway| gateway.find_prediction(&security_id))
        .await
        .map(|prediction| Json(PredictionDetail::from(prediction)))
        .ok_or_else(|| ApiError::NotFound("Security ID not found".to_string()))
}

/// Describe the active forecasting model
#[utoipa::path(
    get,
    path = "/api/v1/model",
    tag = "Model",
    responses(
        (status = 200, description = "Active model handle", body = ModelInfo)
    )
)]
pub async fn get_model(State(state): State<AppState>) -> Json<ModelInfo> {
    Json(state.registry.snapshot().info())
}
