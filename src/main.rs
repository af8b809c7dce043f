//! countgate - object counting server
//!
//! Main entry point.

use countgate::{
    config_store::ConfigStore,
    detector::HttpDetector,
    frame_source::FfmpegDecoder,
    state::{AppConfig, AppState},
    stream_manager::MediaConnector,
    web_api,
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "countgate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting countgate v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        detector_url = %config.detector_url,
        upload_dir = %config.upload_dir.display(),
        results_dir = %config.results_dir.display(),
        max_streams = config.max_streams,
        max_running_jobs = config.max_running_jobs,
        "Configuration loaded"
    );

    // Database is optional; cameras and zones stay in memory without it
    let config_store = match &config.database_url {
        Some(url) => {
            let pool = MySqlPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await?;
            tracing::info!("Database connected");
            let store = ConfigStore::with_pool(pool).await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, cameras and zones are kept in memory");
            Arc::new(ConfigStore::in_memory())
        }
    };
    tracing::info!("ConfigStore initialized");

    let detector = Arc::new(HttpDetector::new(
        config.detector_url.clone(),
        config.detector_timeout,
    )?);
    let decoder = Arc::new(FfmpegDecoder::new(config.stream_probe_timeout));
    let connector = Arc::new(MediaConnector::new()?);

    let state = AppState::new(config, config_store, detector, decoder, connector);
    state.jobs.storage().ensure_dirs().await?;
    tracing::info!("Job storage ready");

    let app = web_api::create_router(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.jobs.cancel_all().await;
    state.streams.stop_all().await;
    tracing::info!("Shutdown complete");

    Ok(())
}
