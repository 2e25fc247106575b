use anyhow::{Context, Result};
use around_service::{
    start_api_server, AppState, BlobStore, Config, CredentialStore, ElasticIndex,
    GeoQueryService, PgRecordStore, PostIngestion, RecordStore, S3BlobStore, SearchIndex,
    TokenService,
};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Around Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize backends
    let index: Arc<dyn SearchIndex> = Arc::new(
        ElasticIndex::new(&config.search).context("Failed to initialize search index")?,
    );

    let record_store = PgRecordStore::new(&config.database)
        .await
        .context("Failed to initialize record store")?;

    // Run migrations if enabled
    if config.database.run_migrations {
        record_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }
    let records: Arc<dyn RecordStore> = Arc::new(record_store);

    let blobs: Arc<dyn BlobStore> = Arc::new(
        S3BlobStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 blob store")?,
    );

    index
        .ensure_schema()
        .await
        .context("Failed to prepare search index")?;

    // Wire services
    let credentials = CredentialStore::new(index.clone());
    let tokens = Arc::new(TokenService::new(&config.auth, credentials.clone()));
    let ingestion = Arc::new(PostIngestion::new(
        index.clone(),
        blobs,
        records.clone(),
        config.s3.bucket.clone(),
        config.ingest.require_media,
    ));
    let geo = Arc::new(
        GeoQueryService::new(index.clone(), config.ingest.default_radius_km)
            .context("Invalid default search radius")?,
    );

    let state = AppState {
        tokens,
        credentials,
        ingestion,
        geo,
        index,
        records,
    };

    info!("Around service started successfully");

    start_api_server(state, &config.api, shutdown_signal()).await?;

    info!("Around service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
