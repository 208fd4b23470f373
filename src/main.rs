use stock_sense_api::forecast::HttpForecaster;
use stock_sense_api::jobs::TokioClock;
use stock_sense_api::sources::HttpQuoteSource;
use stock_sense_api::{
    create_router, establish_connection_pool, AppConfig, AppState, ModelRegistry, PersistenceGateway,
    PredictionPipeline, RecurringJobScheduler,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Timeout for a single quote source request
const QUOTE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stock_sense_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    tracing::info!("🗄️  Opening SQLite store at {}", config.database_url);

    let pool = establish_connection_pool(&config.database_url, config.pool_size, config.acquire_timeout)?;
    let gateway = Arc::new(PersistenceGateway::new(pool));

    match gateway.missing_indexes() {
        Some(missing) if missing.is_empty() => tracing::info!("✅ Required indexes present"),
        Some(missing) => tracing::warn!("⚠️  Missing indexes: {}", missing.join(", ")),
        None => tracing::warn!("⚠️  Could not verify indexes"),
    }

    // Collaborators
    let source = Arc::new(HttpQuoteSource::new(&config.quote_source_url, QUOTE_REQUEST_TIMEOUT)?);
    let forecaster = Arc::new(HttpForecaster::new(
        &config.forecast_service_url,
        &config.forecast_symbol_suffix,
        config.forecast_timeout,
    )?);
    let registry = Arc::new(ModelRegistry::new(
        forecaster,
        config.model_variant,
        config.forecast_service_url.clone(),
    ));

    let pipeline = Arc::new(PredictionPipeline::new(
        source,
        Arc::clone(&gateway),
        Arc::clone(&registry),
        config.pipeline(),
    ));

    tracing::info!("📡 Prediction pipeline ready (batch size {})", pipeline.batch_size());

    // Recurring job
    let scheduler = Arc::new(RecurringJobScheduler::new(
        pipeline.clone(),
        Arc::new(TokioClock),
        config.scheduler_interval,
        config.scheduler_run_on_start,
    )?);
    scheduler.start()?;

    let app = create_router(AppState {
        runner: pipeline,
        gateway,
        registry,
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;

    tracing::info!("🚀 Stock Sense API server running on http://{}", config.bind_addr);
    tracing::info!("📊 Health check: http://{}/health", config.bind_addr);
    tracing::info!("📚 Swagger UI: http://{}/swagger-ui", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown requested");
        })
        .await?;

    scheduler.stop().await;

    Ok(())
}
