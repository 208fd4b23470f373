use crate::database::enums::ModelVariant;
use crate::pipeline::PipelineConfig;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Process configuration, read from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite path or URI
    pub database_url: String,

    /// Connections kept open by the pool
    pub pool_size: u32,

    /// Upper bound on waiting for a pooled connection
    pub acquire_timeout: Duration,

    /// Rows per page and jobs per wave
    pub batch_size: usize,

    pub forecast_timeout: Duration,

    /// Time between the end of one scheduled run and the start of the next
    pub scheduler_interval: Duration,

    pub scheduler_run_on_start: bool,

    pub ingest_concurrency: usize,

    pub quote_source_url: String,

    pub forecast_service_url: String,

    /// Appended to each security id before it is sent to the forecast service
    pub forecast_symbol_suffix: String,

    pub model_variant: ModelVariant,

    pub bind_addr: SocketAddr,
}

impl AppConfig {
    /// Load from process environment (call `dotenvy::dotenv()` first)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let pool_size: u32 = env.parse_or("DB_POOL_MAX_SIZE", 10)?;
        let batch_size: usize = env.parse_or("PREDICTION_BATCH_SIZE", crate::pipeline::DEFAULT_BATCH_SIZE)?;
        let ingest_concurrency: usize = env.parse_or("INGEST_CONCURRENCY", 1)?;
        let interval_secs: u64 = env.parse_or("SCHEDULER_INTERVAL_SECS", 3600)?;
        let acquire_timeout_secs: u64 = env.parse_or("DB_ACQUIRE_TIMEOUT_SECS", 30)?;
        let forecast_timeout_secs: u64 = env.parse_or("FORECAST_TIMEOUT_SECS", 120)?;

        env.positive("DB_POOL_MAX_SIZE", pool_size as u64)?;
        env.positive("PREDICTION_BATCH_SIZE", batch_size as u64)?;
        env.positive("INGEST_CONCURRENCY", ingest_concurrency as u64)?;
        env.positive("SCHEDULER_INTERVAL_SECS", interval_secs)?;
        env.positive("DB_ACQUIRE_TIMEOUT_SECS", acquire_timeout_secs)?;
        env.positive("FORECAST_TIMEOUT_SECS", forecast_timeout_secs)?;

        let model_variant = match env.get("MODEL_VARIANT") {
            Some(raw) => ModelVariant::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "MODEL_VARIANT",
                value: raw.clone(),
                reason: "expected lstm, linear or remote".to_string(),
            })?,
            None => ModelVariant::default(),
        };

        Ok(Self {
            database_url: env.get("DATABASE_URL").unwrap_or_else(|| "stock_sense.db".to_string()),
            pool_size,
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
            batch_size,
            forecast_timeout: Duration::from_secs(forecast_timeout_secs),
            scheduler_interval: Duration::from_secs(interval_secs),
            scheduler_run_on_start: env.parse_or("SCHEDULER_RUN_ON_START", true)?,
            ingest_concurrency,
            quote_source_url: env.required("QUOTE_SOURCE_URL")?,
            forecast_service_url: env.required("FORECAST_SERVICE_URL")?,
            forecast_symbol_suffix: env.get("FORECAST_SYMBOL_SUFFIX").unwrap_or_else(|| ".BO".to_string()),
            model_variant,
            bind_addr: env.parse_or("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 5005)))?,
        })
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            batch_size: self.batch_size,
            forecast_timeout: self.forecast_timeout,
            ingest_concurrency: self.ingest_concurrency,
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Trimmed value; blank counts as unset
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn positive(&self, key: &'static str, value: u64) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid {
                key,
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
