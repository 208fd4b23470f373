use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::handlers::*;
use super::openapi::ApiDocV1;

/// Create the API router with Swagger UI
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/v1/openapi.json", ApiDocV1::openapi()))
        .route("/health", get(health_check))
        // Prediction endpoints
        .route("/api/v1/predictions", get(list_predictions))
        .route("/api/v1/predictions/trigger", post(trigger_predictions))
        .route("/api/v1/predictions/:security_id", get(get_prediction))
        // Model endpoints
        .route("/api/v1/model", get(get_model))
        .with_state(state)
}
