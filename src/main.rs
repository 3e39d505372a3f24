//! Inference Coordinator - Main Entry Point
//!
//! Discovers the models served by the backend inference server, then
//! serves routing and aggregation requests over NATS.

use anyhow::{Context, Result};
use inference_coordinator::{
    aggregator::Aggregator,
    backend::{HttpBackend, InferenceBackend},
    config::AppConfig,
    metrics::{CoordinatorMetrics, MetricsReporter},
    registry::ModelRegistry,
    router::InferenceRouter,
    service::CoordinatorService,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        format!("inference_coordinator={}", config.logging.level).parse()?,
    );
    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting Inference Coordinator");
    info!(
        backend_url = %config.backend.url,
        connect_attempts = config.backend.connect_attempts,
        "Configuration loaded successfully"
    );

    // Initialize metrics
    let metrics = Arc::new(CoordinatorMetrics::new());

    // Build the backend client and discover servable models
    let backend: Arc<dyn InferenceBackend> = Arc::new(HttpBackend::new(&config.backend)?);
    let registry = Arc::new(ModelRegistry::new(
        backend.clone(),
        &config.backend,
        metrics.clone(),
    ));
    registry
        .initialize()
        .await
        .context("registry initialization failed")?;
    info!(
        models_loaded = registry.model_count(),
        "Model registry ready"
    );

    // Initialize router and aggregator
    let router = Arc::new(InferenceRouter::new(
        backend.clone(),
        registry.clone(),
        metrics.clone(),
        config.coordinator.identity.clone(),
    ));
    let aggregator = Arc::new(Aggregator::new(config.coordinator.identity.clone()));

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    // Start metrics reporter (prints summary every 30 seconds)
    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        let reporter = MetricsReporter::new(metrics_clone, 30);
        reporter.start().await;
    });

    // Serve until the subscriptions close
    let service = Arc::new(CoordinatorService::new(
        client, router, aggregator, registry, backend, &config,
    ));
    service.run().await?;

    info!("Coordinator shutting down...");
    metrics.print_summary();

    Ok(())
}
