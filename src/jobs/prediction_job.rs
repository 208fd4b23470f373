use crate::pipeline::{PipelineRunner, PipelineSummary};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Baseline spacing between runs
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler interval must be greater than zero")]
    ZeroInterval,

    #[error("Scheduler already started")]
    AlreadyStarted,
}

/// Time source for the scheduler loop
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Tokio's clock; honours `tokio::time::pause` in tests
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// Result of asking for one cycle
#[derive(Debug)]
pub enum CycleOutcome {
    Completed(Box<PipelineSummary>),
    /// A run was already in progress
    Skipped,
}

/// Re-runs the prediction pipeline on a fixed interval
///
/// The interval is measured from the end of one run to the start of the next, so
/// runs never overlap and a slow run pushes the schedule back instead of queueing.
pub struct RecurringJobScheduler {
    runner: Arc<dyn PipelineRunner>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    run_on_start: bool,
    in_progress: AtomicBool,
    started: AtomicBool,
    cycles: AtomicU64,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the in-progress flag on every exit path
struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RecurringJobScheduler {
    pub fn new(
        runner: Arc<dyn PipelineRunner>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        run_on_start: bool,
    ) -> Result<Self, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::ZeroInterval);
        }

        Ok(Self {
            runner,
            clock,
            interval,
            run_on_start,
            in_progress: AtomicBool::new(false),
            started: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the background loop
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyStarted);
        }

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move { scheduler.run_loop().await });
        *self.handle.lock() = Some(handle);

        tracing::info!(
            "✅ Prediction job scheduled every {}s (run on start: {})",
            self.interval.as_secs(),
            self.run_on_start
        );
        Ok(())
    }

    /// Stop the loop and wait for it to exit
    ///
    /// A run already in flight finishes first.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("❌ Scheduler loop ended abnormally: {}", e);
            }
        }
        tracing::info!("Prediction job scheduler stopped");
    }

    /// Run the pipeline now unless a run is already in progress
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Prediction run already in progress, skipping cycle");
            return CycleOutcome::Skipped;
        }
        let _guard = InProgress(&self.in_progress);

        let summary = self.runner.run().await;
        self.cycles.fetch_add(1, Ordering::Relaxed);
        CycleOutcome::Completed(Box::new(summary))
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_loop(&self) {
        let mut first = true;
        loop {
            if !(first && self.run_on_start) {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    _ = self.clock.sleep(self.interval) => {}
                }
            }
            first = false;

            if self.shutdown.is_cancelled() {
                break;
            }

            match self.run_cycle().await {
                CycleOutcome::Completed(summary) => {
                    tracing::info!(
                        run_id = %summary.run_id,
                        "🕐 Scheduled run done; next in {}s (at {:?})",
                        self.interval.as_secs(),
                        self.clock.now() + self.interval
                    );
                }
                CycleOutcome::Skipped => {
                    tracing::warn!("⚠️  Scheduled run skipped: previous run still executing");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::enums::ModelVariant;
    use crate::pipeline::IngestReport;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    /// Takes `duration` per run and records when each run started and ended
    struct TimedRunner {
        duration: Duration,
        spans: Mutex<Vec<(Instant, Instant)>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TimedRunner {
        fn new(duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                duration,
                spans: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PipelineRunner for TimedRunner {
        async fn run(&self) -> PipelineSummary {
            let start = Instant::now();
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.duration).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.spans.lock().push((start, Instant::now()));

            PipelineSummary {
                run_id: Uuid::new_v4(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                duration_ms: self.duration.as_millis() as u64,
                model_version: 1,
                model_variant: ModelVariant::Remote,
                batch_size: 3,
                ingest: IngestReport::default(),
                waves: Vec::new(),
                processed: 0,
                predicted: 0,
                deactivated: 0,
                failed: 0,
                latency: Vec::new(),
            }
        }
    }

    fn scheduler(runner: Arc<TimedRunner>, interval: Duration, run_on_start: bool) -> Arc<RecurringJobScheduler> {
        Arc::new(RecurringJobScheduler::new(runner, Arc::new(TokioClock), interval, run_on_start).unwrap())
    }

    fn assert_close(actual: Duration, expected: Duration) {
        let tolerance = Duration::from_millis(5);
        assert!(
            actual >= expected && actual <= expected + tolerance,
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = RecurringJobScheduler::new(
            TimedRunner::new(Duration::ZERO),
            Arc::new(TokioClock),
            Duration::ZERO,
            true,
        );
        assert_eq!(result.err(), Some(SchedulerError::ZeroInterval));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_measured_from_completion() {
        let runner = TimedRunner::new(Duration::from_secs(10));
        let scheduler = scheduler(Arc::clone(&runner), Duration::from_secs(60), true);

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(155)).await;
        scheduler.stop().await;

        let spans = runner.spans.lock().clone();
        assert_eq!(spans.len(), 3);
        for pair in spans.windows(2) {
            // next start = previous end + interval
            assert_close(pair[1].0 - pair[0].1, Duration::from_secs(60));
            assert_close(pair[1].0 - pair[0].0, Duration::from_secs(70));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_runs_never_overlap() {
        let runner = TimedRunner::new(Duration::from_secs(30));
        let scheduler = scheduler(Arc::clone(&runner), Duration::from_secs(1), true);

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(200)).await;
        scheduler.stop().await;

        assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
        let spans = runner.spans.lock().clone();
        assert!(spans.len() >= 5);
        for pair in spans.windows(2) {
            assert!(pair[1].0 >= pair[0].1 + Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_run_waits_one_interval_when_not_run_on_start() {
        let runner = TimedRunner::new(Duration::from_secs(1));
        let scheduler = scheduler(Arc::clone(&runner), Duration::from_secs(60), false);
        let begin = Instant::now();

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(scheduler.cycles_completed(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(scheduler.cycles_completed(), 1);
        assert_close(runner.spans.lock()[0].0 - begin, Duration::from_secs(60));

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_skipped_while_running() {
        let runner = TimedRunner::new(Duration::from_secs(10));
        let scheduler = scheduler(Arc::clone(&runner), Duration::from_secs(60), true);

        let background = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run_cycle().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(scheduler.is_running());
        assert!(matches!(scheduler.run_cycle().await, CycleOutcome::Skipped));

        assert!(matches!(background.await.unwrap(), CycleOutcome::Completed(_)));
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.cycles_completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_run_finish() {
        let runner = TimedRunner::new(Duration::from_secs(10));
        let scheduler = scheduler(Arc::clone(&runner), Duration::from_secs(60), true);

        scheduler.start().unwrap();
        assert_eq!(scheduler.start(), Err(SchedulerError::AlreadyStarted));

        tokio::time::sleep(Duration::from_secs(5)).await;
        scheduler.stop().await;
        assert_eq!(scheduler.cycles_completed(), 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(runner.spans.lock().len(), 1);
    }
}
