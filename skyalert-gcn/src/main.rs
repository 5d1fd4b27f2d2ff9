//! skyalert-gcn - Alert ingestion microservice
//!
//! Consumes GCN notices from the broker, stores events, notices and sky
//! localizations, and serves health and spatial-catalog endpoints.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skyalert_common::config::{load_config, resolve_database_path};
use skyalert_gcn::consumer::{
    ConsumerService, HttpHealthProbe, JetStreamConnector, NoticeHandler, SharedConsumerStatus,
};
use skyalert_gcn::ingest::Ingestor;
use skyalert_gcn::localization::FitsSkymapFetcher;
use skyalert_gcn::AppState;

/// Command-line arguments for skyalert-gcn
#[derive(Parser, Debug)]
#[command(name = "skyalert-gcn")]
#[command(about = "GCN alert ingestion and sky localization service")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "SKYALERT_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(short, long, env = "SKYALERT_DATABASE")]
    database: Option<PathBuf>,

    /// Port to listen on (overrides [http] port)
    #[arg(short, long, env = "SKYALERT_PORT")]
    port: Option<u16>,

    /// Ingest one VOEvent file and exit
    #[arg(long, value_name = "PATH")]
    ingest_file: Option<PathBuf>,

    /// Serve HTTP only; do not start the alert consumer
    #[arg(long)]
    no_consumer: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    config.gcn.apply_env_overrides();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("skyalert_gcn={0},skyalert_common={0}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting skyalert-gcn (Alert Ingest) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let db_path = resolve_database_path(args.database.as_deref(), &config);
    info!("Database: {}", db_path.display());

    let db_pool = skyalert_common::db::init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let fetcher = Arc::new(
        FitsSkymapFetcher::new(Duration::from_secs(config.gcn.skymap_timeout_secs))
            .context("Failed to build skymap fetcher")?,
    );
    let ingestor = Arc::new(Ingestor::new(db_pool.clone(), fetcher));

    if let Some(path) = args.ingest_file {
        let payload = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        ingestor
            .handle(&payload, "file")
            .await
            .with_context(|| format!("Failed to ingest {}", path.display()))?;
        info!("Ingested {}", path.display());
        return Ok(());
    }

    let consumer_status = SharedConsumerStatus::default();

    if args.no_consumer {
        warn!("Alert consumer not started (--no-consumer)");
    } else {
        info!(
            broker = %config.gcn.broker_url,
            stream = %config.gcn.stream,
            topics = ?config.gcn.topics,
            "Alert consumer configuration"
        );
        let connector = JetStreamConnector::new(
            config.gcn.broker_url.clone(),
            config.gcn.stream.clone(),
            config.gcn.consumer_name.clone(),
        );
        let health = Arc::new(
            HttpHealthProbe::new(config.health.url.clone(), Duration::from_secs(config.health.timeout_secs))
                .context("Failed to build health probe")?,
        );
        let service = ConsumerService::new(connector, health, ingestor.clone(), consumer_status.clone());
        let gcn_config = config.gcn.clone();
        tokio::spawn(async move {
            service.run(gcn_config).await;
            info!("Alert consumer stopped");
        });
    }

    let state = AppState::new(db_pool, consumer_status);
    let app = skyalert_gcn::build_router(state);

    let port = args.port.unwrap_or(config.http.port);
    let addr = format!("{}:{}", config.http.host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
