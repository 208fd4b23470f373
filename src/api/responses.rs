use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crate::database::models::Prediction;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Health check response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// Connections currently leased
    pub pool_in_use: usize,
    pub pool_size: u32,
    pub model_version: u64,
}

/// Point lookup result: the stored row plus its expected move
///
/// `profit` is null for a security that has never been forecast.
#[derive(Debug, Serialize, ToSchema)]
pub struct PredictionDetail {
    #[serde(flatten)]
    pub prediction: Prediction,
    pub profit: Option<f64>,
}

impl From<Prediction> for PredictionDetail {
    fn from(prediction: Prediction) -> Self {
        Self {
            profit: prediction.profit(),
            prediction,
        }
    }
}

/// Handler errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}
