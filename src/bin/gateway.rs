//! Strata gateway binary
//!
//! Loads the table dictionary, starts the metadata loaders and serves the
//! HTTP API until Ctrl-C or SIGTERM.

use strata::api::{self, ApiState};
use strata::clock::MonotonicClock;
use strata::config::{ComponentFactory, GatewayConfig};
use strata::loader::{
    default_loaders, DimensionsLoadedHealthCheck, HealthRegistry, LoaderHealthCheck,
    LoaderScheduler,
};
use strata::metadata::MetadataStore;
use strata::pipeline::RequestPipeline;
use strata::table::PhysicalTableDictionary;
use strata::telemetry::Telemetry;
use strata::Error;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Strata analytics query gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Table dictionary (JSON)
    #[arg(long, env = "STRATA_TABLES")]
    tables: PathBuf,

    /// HTTP API port
    #[arg(long, env = "STRATA_HTTP_PORT", default_value = "8080")]
    http_port: u16,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let _telemetry = Telemetry::init_for_component("strata-gateway", &args.log_level)?;

    let config = GatewayConfig::from_env()?;
    let dictionary = Arc::new(PhysicalTableDictionary::from_path(&args.tables)?);
    info!(
        tables = dictionary.len(),
        datasets = dictionary.datasets().len(),
        cache = ?config.cache.backing,
        "Starting Strata gateway"
    );

    let store = Arc::new(MetadataStore::new());
    let cache = ComponentFactory::create_cache(&config.cache)?;
    let backend = ComponentFactory::create_http_backend(&config.backend)?;

    let scheduler = Arc::new(LoaderScheduler::new(config.loaders.pool_size));
    let health = Arc::new(HealthRegistry::new());
    let clock = Arc::new(MonotonicClock::new());
    for loader in default_loaders(
        &config.loaders,
        &dictionary,
        backend.clone(),
        Arc::clone(&store),
    ) {
        health.register(Arc::new(LoaderHealthCheck::new(
            Arc::clone(&loader),
            config.loaders.staleness_threshold,
            clock.clone(),
        )));
        scheduler.register(loader);
    }
    health.register(Arc::new(DimensionsLoadedHealthCheck::new(
        &dictionary,
        Arc::clone(&store),
    )));
    scheduler.start();

    let pipeline = Arc::new(RequestPipeline::new(
        &config,
        dictionary,
        store,
        cache,
        backend,
    ));

    let router = api::build_http_router(ApiState {
        pipeline,
        health,
        scheduler: Arc::clone(&scheduler),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.http_port));
    let listener = TcpListener::bind(addr).await?;
    let shutdown = CancellationToken::new();
    let http_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    info!(http_port = args.http_port, "Gateway ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {e}")))?;

    info!("Gateway shutting down");
    scheduler.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
