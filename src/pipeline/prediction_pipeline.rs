use super::cursor::BatchCursor;
use super::ingestor::{IngestReport, QuoteIngestor};
use super::wave::{JobContext, JobStatus, WaveReport, WorkerWave};
use super::{PipelineConfig, PipelineRunner};
use crate::database::enums::ModelVariant;
use crate::database::PersistenceGateway;
use crate::forecast::ModelRegistry;
use crate::metrics::{LatencyStats, LatencyTracker};
use crate::sources::QuoteSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use utoipa::ToSchema;
use uuid::Uuid;

/// Everything one run did
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub model_version: u64,
    pub model_variant: ModelVariant,
    pub batch_size: usize,
    pub ingest: IngestReport,
    pub waves: Vec<WaveReport>,
    /// Quotes read from the store and handed to a wave
    pub processed: usize,
    pub predicted: usize,
    pub deactivated: usize,
    pub failed: usize,
    pub latency: Vec<LatencyStats>,
}

/// Ingest, then forecast every stored quote wave by wave
pub struct PredictionPipeline {
    ingestor: QuoteIngestor,
    gateway: Arc<PersistenceGateway>,
    registry: Arc<ModelRegistry>,
    batch_size: usize,
    forecast_timeout: Duration,
}

impl PredictionPipeline {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        gateway: Arc<PersistenceGateway>,
        registry: Arc<ModelRegistry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            ingestor: QuoteIngestor::new(source, Arc::clone(&gateway), config.ingest_concurrency),
            gateway,
            registry,
            batch_size: config.batch_size.max(1),
            forecast_timeout: config.forecast_timeout,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Execute one full run
    ///
    /// Always completes; per-symbol and per-job failures only show up in the counts.
    pub async fn run(&self) -> PipelineSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let model = self.registry.snapshot();

        tracing::info!(
            run_id = %run_id,
            "🚀 Prediction run starting (model v{} {}, batch {})",
            model.version,
            model.variant,
            self.batch_size
        );

        // Barrier: nothing below starts until ingest is done
        let ingest = self.ingestor.fetch_all().await;

        let ctx = Arc::new(JobContext {
            gateway: Arc::clone(&self.gateway),
            model: Arc::clone(&model),
            forecast_timeout: self.forecast_timeout,
            delisted: ingest.delisted.iter().cloned().collect(),
        });

        let wave_pool = WorkerWave::new(self.batch_size);
        let mut cursor = BatchCursor::new(Arc::clone(&self.gateway), self.batch_size);
        let mut latency = LatencyTracker::new();
        let mut waves = Vec::new();

        while let Some(batch) = cursor.next_batch().await {
            let (report, outcomes) = wave_pool.run(waves.len() + 1, batch, Arc::clone(&ctx)).await;

            for outcome in outcomes.iter().filter(|o| o.status != JobStatus::Failed) {
                latency.record_forecast(outcome.forecast_elapsed);
                latency.record_persist(outcome.persist_elapsed);
                latency.record_job(outcome.elapsed);
            }
            waves.push(report);
        }

        let summary = PipelineSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            model_version: model.version,
            model_variant: model.variant,
            batch_size: self.batch_size,
            processed: waves.iter().map(|w| w.size).sum(),
            predicted: waves.iter().map(|w| w.predicted).sum(),
            deactivated: waves.iter().map(|w| w.deactivated).sum(),
            failed: waves.iter().map(|w| w.failed).sum(),
            ingest,
            waves,
            latency: latency.all_stats(),
        };

        let forecast = &summary.latency[0];
        tracing::info!(
            run_id = %run_id,
            "✅ Prediction run complete: {} waves, {} predicted, {} deactivated, {} failed in {}ms (forecast p50 {:.1}ms, p99 {:.1}ms)",
            summary.waves.len(),
            summary.predicted,
            summary.deactivated,
            summary.failed,
            summary.duration_ms,
            forecast.p50_ms(),
            forecast.p99_ms()
        );

        summary
    }
}

#[async_trait]
impl PipelineRunner for PredictionPipeline {
    async fn run(&self) -> PipelineSummary {
        PredictionPipeline::run(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{NewPrediction, NewQuote};
    use crate::database::test_support::temp_gateway;
    use crate::forecast::{ForecastError, Forecaster};
    use crate::sources::{QuoteSnapshot, SourceFetchError};
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves `count` symbols named S0..S{count-1}, all priced 100
    struct SeqSource {
        count: usize,
    }

    #[async_trait]
    impl QuoteSource for SeqSource {
        async fn list_universe(&self) -> Result<Vec<String>, SourceFetchError> {
            Ok((0..self.count).map(|i| format!("S{}", i)).collect())
        }

        async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot, SourceFetchError> {
            Ok(QuoteSnapshot {
                security_id: symbol.to_string(),
                company_name: Some(format!("{} LTD", symbol)),
                current_value: 100.0,
                ..Default::default()
            })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Start(String),
        End(String),
    }

    /// Logs start/end per symbol; fails for anything in `failing`
    struct RecordingForecaster {
        events: Mutex<Vec<Event>>,
        failing: Mutex<HashSet<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl RecordingForecaster {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                failing: Mutex::new(HashSet::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Forecaster for RecordingForecaster {
        async fn predict(&self, symbol: &str) -> Result<f64, ForecastError> {
            self.events.lock().push(Event::Start(symbol.to_string()));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(20)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.events.lock().push(Event::End(symbol.to_string()));

            if self.failing.lock().contains(symbol) {
                Err(ForecastError::Failed("model error".to_string()))
            } else {
                Ok(110.0)
            }
        }
    }

    fn pipeline(count: usize, pool_size: u32, forecaster: Arc<RecordingForecaster>) -> (tempfile::TempDir, Arc<PersistenceGateway>, PredictionPipeline) {
        let (dir, gateway) = temp_gateway(pool_size);
        let registry = Arc::new(ModelRegistry::new(forecaster, ModelVariant::Remote, "recording"));
        let pipeline = PredictionPipeline::new(
            Arc::new(SeqSource { count }),
            Arc::clone(&gateway),
            registry,
            PipelineConfig {
                batch_size: 3,
                forecast_timeout: Duration::from_secs(5),
                ingest_concurrency: 1,
            },
        );
        (dir, gateway, pipeline)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waves_are_barriers() {
        let forecaster = RecordingForecaster::new();
        let (_dir, _gateway, pipeline) = pipeline(7, 10, Arc::clone(&forecaster));

        let summary = pipeline.run().await;

        let sizes: Vec<usize> = summary.waves.iter().map(|w| w.size).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(summary.processed, 7);
        assert_eq!(summary.predicted, 7);
        assert!(forecaster.peak.load(Ordering::SeqCst) <= 3);

        // Every job of wave k ends before any job of wave k+1 starts
        let events = forecaster.events.lock().clone();
        let waves: [&[&str]; 3] = [&["S0", "S1", "S2"], &["S3", "S4", "S5"], &["S6"]];
        for pair in waves.windows(2) {
            let last_end = events
                .iter()
                .rposition(|e| matches!(e, Event::End(s) if pair[0].contains(&s.as_str())))
                .unwrap();
            let first_start = events
                .iter()
                .position(|e| matches!(e, Event::Start(s) if pair[1].contains(&s.as_str())))
                .unwrap();
            assert!(last_end < first_start, "wave overlap in {:?}", events);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_peak_connections_bounded_by_wave_width() {
        let forecaster = RecordingForecaster::new();
        let (_dir, gateway, pipeline) = pipeline(9, 10, forecaster);

        pipeline.run().await;

        assert!(gateway.pool().peak_in_use() <= 3);
        assert_eq!(gateway.pool().in_use(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_forecast_failure_marks_inactive_and_recovers() {
        let forecaster = RecordingForecaster::new();
        let (_dir, gateway, pipeline) = pipeline(3, 4, Arc::clone(&forecaster));

        // Prior successful forecast for S1
        gateway
            .upsert_prediction(&NewPrediction::new("S1", Some("S1 LTD".to_string()), 95.0, 120.0))
            .unwrap();
        forecaster.failing.lock().insert("S1".to_string());

        let summary = pipeline.run().await;
        assert_eq!(summary.predicted, 2);
        assert_eq!(summary.deactivated, 1);

        let row = gateway.find_prediction("S1").unwrap();
        assert!(!row.active);
        assert_eq!(row.current_price, 95.0);
        assert_eq!(row.company_name.as_deref(), Some("S1 LTD"));
        assert_eq!(row.predicted_price, Some(120.0));

        let listed: Vec<String> = gateway
            .list_active_predictions()
            .into_iter()
            .map(|r| r.prediction.security_id)
            .collect();
        assert!(!listed.contains(&"S1".to_string()));

        // Next run succeeds again
        forecaster.failing.lock().clear();
        let summary = pipeline.run().await;
        assert_eq!(summary.predicted, 3);

        let row = gateway.find_prediction("S1").unwrap();
        assert!(row.active);
        assert_eq!(row.current_price, 100.0);
        assert_eq!(row.predicted_price, Some(110.0));
    }

    /// Lists one BSE code that the exchange now reports delisted
    struct DelistedSource;

    #[async_trait]
    impl QuoteSource for DelistedSource {
        async fn list_universe(&self) -> Result<Vec<String>, SourceFetchError> {
            Ok(vec!["500325".to_string()])
        }

        async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot, SourceFetchError> {
            Err(SourceFetchError::Delisted(symbol.to_string()))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_delisted_code_deactivates_stored_security() {
        let forecaster = RecordingForecaster::new();
        let (_dir, gateway) = temp_gateway(2);
        gateway
            .upsert_quote(&NewQuote::new("RELIANCE", 2500.0).with_scrip_code("500325"))
            .unwrap();
        gateway
            .upsert_prediction(&NewPrediction::new("RELIANCE", Some("Reliance Industries".to_string()), 2400.0, 2600.0))
            .unwrap();

        let registry = Arc::new(ModelRegistry::new(Arc::clone(&forecaster) as Arc<dyn Forecaster>, ModelVariant::Remote, "recording"));
        let pipeline = PredictionPipeline::new(Arc::new(DelistedSource), Arc::clone(&gateway), registry, PipelineConfig::default());

        let summary = pipeline.run().await;

        assert_eq!(summary.ingest.delisted, vec!["500325".to_string()]);
        assert_eq!(summary.predicted, 0);
        assert_eq!(summary.deactivated, 1);
        assert!(forecaster.events.lock().is_empty());

        let row = gateway.find_prediction("RELIANCE").unwrap();
        assert!(!row.active);
        assert_eq!(row.predicted_price, Some(2600.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_store_completes_without_waves() {
        let forecaster = RecordingForecaster::new();
        let (_dir, _gateway, pipeline) = pipeline(0, 2, Arc::clone(&forecaster));

        let summary = pipeline.run().await;

        assert!(summary.waves.is_empty());
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.ingest.listed, 0);
        assert!(forecaster.events.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_repeated_runs_are_idempotent() {
        let forecaster = RecordingForecaster::new();
        let (_dir, gateway, pipeline) = pipeline(4, 2, forecaster);

        pipeline.run().await;
        let summary = pipeline.run().await;

        assert_eq!(summary.ingest.stored, 4);
        assert_eq!(gateway.fetch_quote_page(100, 0).unwrap().len(), 4);
        assert_eq!(gateway.list_active_predictions().len(), 4);
        assert_eq!(summary.latency[0].sample_count, 4);
    }
}
