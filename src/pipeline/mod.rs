/// Batch prediction pipeline
///
/// One run is:
/// - Ingestion barrier: every quote is fetched and stored before any forecast
/// - Paging: persisted quotes are read in fixed-size batches
/// - Waves: one job per quote in a batch, joined before the next batch is read
///
/// Nothing below [`PredictionPipeline::run`] aborts a run; failures are counted in
/// the returned [`PipelineSummary`].

mod cursor;
mod ingestor;
mod prediction_pipeline;
mod wave;

pub use cursor::BatchCursor;
pub use ingestor::{IngestReport, QuoteIngestor};
pub use prediction_pipeline::{PipelineSummary, PredictionPipeline};
pub use wave::{JobOutcome, JobStatus, WaveReport, WorkerWave};

use crate::database::PersistenceGateway;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Baseline batch size (and wave width)
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Run-level knobs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Rows per page and jobs per wave
    pub batch_size: usize,

    /// Upper bound on a single forecast call
    pub forecast_timeout: Duration,

    /// Quote fetches in flight during ingest
    pub ingest_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            forecast_timeout: Duration::from_secs(120),
            ingest_concurrency: 1,
        }
    }
}

/// Something the scheduler can run to completion
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(&self) -> PipelineSummary;
}

/// Run gateway work on the blocking pool
///
/// A panicked or cancelled blocking task counts as "could not complete".
pub(crate) async fn with_gateway<R, F>(gateway: &Arc<PersistenceGateway>, f: F) -> Option<R>
where
    F: FnOnce(&PersistenceGateway) -> Option<R> + Send + 'static,
    R: Send + 'static,
{
    let gateway = Arc::clone(gateway);
    match tokio::task::spawn_blocking(move || f(&gateway)).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("❌ Blocking database task failed: {}", e);
            None
        }
    }
}
