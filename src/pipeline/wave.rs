use super::with_gateway;
use crate::database::models::{InactivePrediction, NewPrediction, Quote};
use crate::database::PersistenceGateway;
use crate::forecast::{ForecastError, ModelHandle};
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use utoipa::ToSchema;

/// Shared, read-only inputs for every job in a run
pub(crate) struct JobContext {
    pub gateway: Arc<PersistenceGateway>,
    pub model: Arc<ModelHandle>,
    pub forecast_timeout: Duration,
    /// Universe codes the source reported delisted during this run's ingest
    pub delisted: HashSet<String>,
}

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Forecast stored, row active
    Predicted,
    /// Forecast unavailable, row marked inactive
    Deactivated,
    /// Job panicked outside the forecast or its write could not complete
    Failed,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub security_id: String,
    pub status: JobStatus,
    pub forecast_elapsed: Duration,
    pub persist_elapsed: Duration,
    pub elapsed: Duration,
}

/// Counts for one wave
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct WaveReport {
    pub wave: usize,
    pub size: usize,
    pub predicted: usize,
    pub deactivated: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
}

/// Fixed-width worker pool that runs one batch at a time
///
/// `run` returns only after every job it spawned has finished, so consecutive
/// calls never overlap. The semaphore caps concurrency at `width` even when handed
/// a larger batch.
pub struct WorkerWave {
    width: usize,
    permits: Arc<Semaphore>,
}

impl WorkerWave {
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            width,
            permits: Arc::new(Semaphore::new(width)),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run one job per quote and wait for all of them
    pub(crate) async fn run(&self, wave: usize, quotes: Vec<Quote>, ctx: Arc<JobContext>) -> (WaveReport, Vec<JobOutcome>) {
        let started = Instant::now();
        let mut report = WaveReport {
            wave,
            size: quotes.len(),
            ..Default::default()
        };

        tracing::debug!(wave, size = quotes.len(), "🌊 Wave starting");

        let mut jobs = JoinSet::new();
        for quote in quotes {
            let permits = Arc::clone(&self.permits);
            let ctx = Arc::clone(&ctx);
            jobs.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let security_id = quote.security_id.clone();
                match AssertUnwindSafe(run_job(ctx, quote)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::error!(security_id = %security_id, "❌ Prediction job panicked");
                        JobOutcome::failed(security_id)
                    }
                }
            });
        }

        let mut outcomes = Vec::with_capacity(report.size);
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(wave, "❌ Prediction job did not complete: {}", e);
                    report.failed += 1;
                }
            }
        }

        for outcome in &outcomes {
            match outcome.status {
                JobStatus::Predicted => report.predicted += 1,
                JobStatus::Deactivated => report.deactivated += 1,
                JobStatus::Failed => report.failed += 1,
            }
        }
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            wave,
            "🌊 Wave {} done: {} predicted, {} deactivated, {} failed in {}ms",
            wave,
            report.predicted,
            report.deactivated,
            report.failed,
            report.elapsed_ms
        );

        (report, outcomes)
    }
}

impl JobOutcome {
    fn failed(security_id: String) -> Self {
        Self {
            security_id,
            status: JobStatus::Failed,
            forecast_elapsed: Duration::ZERO,
            persist_elapsed: Duration::ZERO,
            elapsed: Duration::ZERO,
        }
    }
}

/// Universe codes are scrip codes, so a delisting can name either column
fn is_delisted(ctx: &JobContext, quote: &Quote) -> bool {
    ctx.delisted.contains(&quote.security_id)
        || quote
            .scrip_code
            .as_deref()
            .is_some_and(|code| ctx.delisted.contains(code))
}

async fn forecast(ctx: &JobContext, quote: &Quote) -> Result<f64, ForecastError> {
    let security_id = quote.security_id.as_str();
    if is_delisted(ctx, quote) {
        return Err(ForecastError::Inactive(security_id.to_string()));
    }

    let predict = AssertUnwindSafe(ctx.model.forecaster.predict(security_id)).catch_unwind();
    match tokio::time::timeout(ctx.forecast_timeout, predict).await {
        Ok(Ok(Ok(price))) if price.is_finite() => Ok(price),
        Ok(Ok(Ok(price))) => Err(ForecastError::Failed(format!("non-finite forecast {}", price))),
        Ok(Ok(Err(e))) => Err(e),
        Ok(Err(_)) => Err(ForecastError::Failed("forecaster panicked".to_string())),
        Err(_) => Err(ForecastError::TimedOut(ctx.forecast_timeout)),
    }
}

/// Forecast one quote, then persist the result
///
/// No connection is held while the forecast is in flight.
async fn run_job(ctx: Arc<JobContext>, quote: Quote) -> JobOutcome {
    let started = Instant::now();
    let security_id = quote.security_id.clone();

    let result = forecast(&ctx, &quote).await;
    let forecast_elapsed = started.elapsed();

    let persist_started = Instant::now();
    let (status, written) = match result {
        Ok(predicted_price) => {
            tracing::debug!(security_id = %security_id, predicted_price, "Forecast ready");
            let record = NewPrediction::new(
                security_id.clone(),
                quote.company_name.clone(),
                quote.current_value,
                predicted_price,
            )
            .with_variant(ctx.model.variant);
            let written = with_gateway(&ctx.gateway, move |gateway| gateway.upsert_prediction(&record)).await;
            (JobStatus::Predicted, written)
        }
        Err(e) => {
            if e.marks_inactive() {
                tracing::info!(security_id = %security_id, "Security inactive: {}", e);
            } else {
                tracing::warn!(security_id = %security_id, "⚠️  Forecast failed, marking inactive: {}", e);
            }
            let record = InactivePrediction::new(
                security_id.clone(),
                quote.company_name.clone(),
                quote.current_value,
                ctx.model.variant,
            );
            let written = with_gateway(&ctx.gateway, move |gateway| gateway.deactivate_prediction(&record)).await;
            (JobStatus::Deactivated, written)
        }
    };

    JobOutcome {
        security_id,
        status: if written.is_some() { status } else { JobStatus::Failed },
        forecast_elapsed,
        persist_elapsed: persist_started.elapsed(),
        elapsed: started.elapsed(),
    }
}
