//! Waste Scanner - periodic cloud waste detection
//!
//! Scans a resource snapshot against the built-in and configured rules on
//! a fixed interval and serves the latest report over HTTP.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use waste_lib::{
    health::{components, HealthRegistry},
    observability::ScanLogger,
    pricing::FilePricingSource,
    providers::{RetryPolicy, RetryingInventory, RetryingMetricsProvider, SnapshotProvider},
    EngineConfig, RuleRegistry, ScanConfig, Scanner,
};
use waste_scanner::{
    api::{self, AppState, LatestReport},
    config::ScannerConfig,
    scan_loop::ScanLoop,
};

const SCANNER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting waste-scanner");

    // Load configuration
    let config = ScannerConfig::load()?;
    let engine_config = EngineConfig::load(config.engine_config_path.as_deref())?;
    info!(
        node_name = %config.node_name,
        snapshot = %config.snapshot_path.display(),
        pricing = %config.pricing_path.display(),
        "Scanner configured"
    );

    let registry = RuleRegistry::with_builtin_rules().apply_overrides(&engine_config)?;

    let logger = ScanLogger::new(&config.node_name);
    logger.log_startup(SCANNER_VERSION, registry.len());

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    for component in components::ALL {
        health_registry.register(component).await;
    }

    // Providers: the snapshot serves both inventory and metrics
    let snapshot = Arc::new(SnapshotProvider::load(&config.snapshot_path).await?);
    let retry = RetryPolicy::from(&engine_config.retry);

    let scanner = Scanner::builder()
        .inventory(Arc::new(RetryingInventory::new(snapshot.clone(), retry)))
        .metrics_provider(Arc::new(RetryingMetricsProvider::new(snapshot.clone(), retry)))
        .pricing(Arc::new(FilePricingSource::new(&config.pricing_path)))
        .registry(registry)
        .config(ScanConfig::from(&engine_config.scan))
        .logger(logger.clone())
        .health(health_registry.clone())
        .build()?;

    // Create shared application state
    let latest: LatestReport = Arc::new(RwLock::new(None));
    let app_state = Arc::new(AppState::new(health_registry.clone(), latest.clone()));

    // Start health, metrics and report server
    let _api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Start scanning
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scan_loop = ScanLoop::new(
        Arc::new(scanner),
        latest,
        health_registry,
        config.scan_interval(),
    )
    .with_snapshot(snapshot);
    let scan_handle = tokio::spawn(scan_loop.run(shutdown_rx));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());
    scan_handle.await?;
    info!("Shutting down");

    Ok(())
}
