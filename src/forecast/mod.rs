//! Forecasting collaborators
//!
//! The pipeline never talks to a [`Forecaster`] directly: it snapshots a
//! [`ModelHandle`] from the [`ModelRegistry`] at the start of each run, so a model
//! swapped mid-run only takes effect on the next one.

mod http_forecaster;

pub use http_forecaster::HttpForecaster;

use crate::database::enums::ModelVariant;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

/// Why a symbol could not be forecast
///
/// Every variant downgrades the prediction to inactive; none aborts a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastError {
    /// The model reports the security is no longer predictable
    #[error("Security inactive: {0}")]
    Inactive(String),

    #[error("Forecast failed: {0}")]
    Failed(String),

    #[error("Forecast timed out after {0:?}")]
    TimedOut(Duration),
}

impl ForecastError {
    /// Returns true if the model itself declared the security inactive
    pub fn marks_inactive(&self) -> bool {
        matches!(self, ForecastError::Inactive(_))
    }

    /// Returns true if the same call might succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, ForecastError::TimedOut(_))
    }
}

/// Price forecasting model
#[async_trait]
pub trait Forecaster: Send + Sync {
    async fn predict(&self, symbol: &str) -> Result<f64, ForecastError>;
}

/// Immutable, versioned reference to a forecaster
pub struct ModelHandle {
    pub version: u64,
    pub variant: ModelVariant,
    pub label: String,
    pub loaded_at: DateTime<Utc>,
    pub forecaster: Arc<dyn Forecaster>,
}

impl ModelHandle {
    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            version: self.version,
            variant: self.variant,
            label: self.label.clone(),
            loaded_at: self.loaded_at,
        }
    }
}

/// Serializable description of the active model
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ModelInfo {
    pub version: u64,
    pub variant: ModelVariant,
    pub label: String,
    pub loaded_at: DateTime<Utc>,
}

/// Holder of the current model handle
///
/// Swaps replace the whole handle under a write lock; readers clone the `Arc` and
/// keep using their snapshot.
pub struct ModelRegistry {
    current: RwLock<Arc<ModelHandle>>,
}

impl ModelRegistry {
    pub fn new(forecaster: Arc<dyn Forecaster>, variant: ModelVariant, label: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(Arc::new(ModelHandle {
                version: 1,
                variant,
                label: label.into(),
                loaded_at: Utc::now(),
                forecaster,
            })),
        }
    }

    /// Handle to use for one run
    pub fn snapshot(&self) -> Arc<ModelHandle> {
        Arc::clone(&self.current.read())
    }

    /// Install a new model; returns its version
    pub fn swap(&self, forecaster: Arc<dyn Forecaster>, variant: ModelVariant, label: impl Into<String>) -> u64 {
        let mut current = self.current.write();
        let version = current.version + 1;
        *current = Arc::new(ModelHandle {
            version,
            variant,
            label: label.into(),
            loaded_at: Utc::now(),
            forecaster,
        });

        tracing::info!("🔁 Model swapped to v{} ({})", version, variant);
        version
    }
}
