/// Scheduled background jobs
///
/// Contains the recurring prediction job:
/// - Runs the full pipeline (ingest, then forecast waves) on a fixed interval
/// - Never overlaps runs; the interval counts from the end of the previous run

pub mod prediction_job;

pub use prediction_job::{
    Clock, CycleOutcome, RecurringJobScheduler, SchedulerError, TokioClock, DEFAULT_INTERVAL,
};
