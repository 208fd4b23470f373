// Library Crate Root
// lib.rs

// main.rs imports through lib.rs like an external crate
pub mod api;
pub mod config;
pub mod database;
pub mod forecast;
pub mod jobs;
pub mod metrics;
pub mod pipeline;
pub mod sources;

// pub use = re-export at crate root
pub use api::{create_router, AppState};
pub use config::{AppConfig, ConfigError};
pub use database::{establish_connection_pool, ConnectionPool, DatabaseError, PersistenceGateway};
pub use forecast::{Forecaster, ModelRegistry};
pub use jobs::RecurringJobScheduler;
pub use pipeline::{PipelineSummary, PredictionPipeline};
pub use sources::QuoteSource;
