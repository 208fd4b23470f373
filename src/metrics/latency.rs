use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

/// Highest trackable latency: one hour, in microseconds
const MAX_TRACKABLE_US: u64 = 3_600_000_000;

/// Per-run latency tracker using HDR Histograms
///
/// One tracker lives for one pipeline run; jobs report their timings back to the
/// run, which records them here, so no locking is needed.
pub struct LatencyTracker {
    /// Forecast call duration (network + model)
    forecast_us: Histogram<u64>,

    /// Prediction upsert duration, including connection wait
    persist_us: Histogram<u64>,

    /// Whole job, forecast through persistence
    job_us: Histogram<u64>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        // 1us to 1 hour, 3 significant figures
        Self {
            forecast_us: new_histogram(),
            persist_us: new_histogram(),
            job_us: new_histogram(),
        }
    }

    #[inline]
    pub fn record_forecast(&mut self, elapsed: Duration) {
        record(&mut self.forecast_us, elapsed);
    }

    #[inline]
    pub fn record_persist(&mut self, elapsed: Duration) {
        record(&mut self.persist_us, elapsed);
    }

    #[inline]
    pub fn record_job(&mut self, elapsed: Duration) {
        record(&mut self.job_us, elapsed);
    }

    pub fn forecast_stats(&self) -> LatencyStats {
        LatencyStats::from_histogram("forecast", &self.forecast_us)
    }

    pub fn persist_stats(&self) -> LatencyStats {
        LatencyStats::from_histogram("persist", &self.persist_us)
    }

    pub fn job_stats(&self) -> LatencyStats {
        LatencyStats::from_histogram("job", &self.job_us)
    }

    /// Get all latency statistics
    pub fn all_stats(&self) -> Vec<LatencyStats> {
        vec![self.forecast_stats(), self.persist_stats(), self.job_stats()]
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn new_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3).expect("static histogram bounds are valid")
}

fn record(histogram: &mut Histogram<u64>, elapsed: Duration) {
    let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX).max(1);
    histogram.saturating_record(micros);
}

/// Percentile summary of one histogram, in microseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LatencyStats {
    pub metric_name: String,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub sample_count: u64,
}

impl LatencyStats {
    fn from_histogram(metric_name: &str, histogram: &Histogram<u64>) -> Self {
        if histogram.is_empty() {
            return Self {
                metric_name: metric_name.to_string(),
                p50_us: 0,
                p95_us: 0,
                p99_us: 0,
                max_us: 0,
                mean_us: 0.0,
                sample_count: 0,
            };
        }

        Self {
            metric_name: metric_name.to_string(),
            p50_us: histogram.value_at_quantile(0.50),
            p95_us: histogram.value_at_quantile(0.95),
            p99_us: histogram.value_at_quantile(0.99),
            max_us: histogram.max(),
            mean_us: histogram.mean(),
            sample_count: histogram.len(),
        }
    }

    /// Convert microseconds to milliseconds for display
    pub fn p50_ms(&self) -> f64 {
        self.p50_us as f64 / 1000.0
    }

    pub fn p99_ms(&self) -> f64 {
        self.p99_us as f64 / 1000.0
    }

    pub fn max_ms(&self) -> f64 {
        self.max_us as f64 / 1000.0
    }
}
