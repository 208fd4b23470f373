use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::database::enums::ModelVariant;
use crate::database::models::{DepthLevel, Prediction, RankedPrediction};
use crate::forecast::ModelInfo;
use crate::metrics::LatencyStats;
use crate::pipeline::{IngestReport, JobStatus, PipelineSummary, WaveReport};

/// OpenAPI v1 specification
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Stock Sense API",
        version = "1.0.0",
        description = "Scheduled quote ingestion and batch price prediction",
        license(
            name = "MIT"
        )
    ),
    paths(
        handlers::health_check,
        handlers::trigger_predictions,
        handlers::list_predictions,
        handlers::get_prediction,
        handlers::get_model,
    ),
    components(
        schemas(
            Prediction,
            RankedPrediction,
            PredictionDetail,
            ModelVariant,
            ModelInfo,
            DepthLevel,
            PipelineSummary,
            IngestReport,
            WaveReport,
            JobStatus,
            LatencyStats,
            HealthResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Predictions", description = "Prediction runs and results"),
        (name = "Model", description = "Forecasting model information"),
    )
)]
pub struct ApiDocV1;
