//! Compute Provisioner - node autoscaler for pipeline runs
//!
//! Watches for run pods the scheduler cannot place, requests a node for each
//! run and submits the run's pod once the node is granted.

use anyhow::{Context, Result};
use compute_provisioner::{
    api,
    cluster::DetachedCluster,
    config::ProvisionerConfig,
};
use provisioner_lib::{
    autoscale::{
        AutoscaleCoordinator, ClusterClient, CommandNodeProvisioner, InMemoryAttemptStore,
        InMemoryRunStore, KubeClusterClient,
    },
    catalog::{CatalogResolver, CatalogWatcher},
    health::{components, HealthRegistry},
    observability::{ProvisionerMetrics, StructuredLogger},
    placement::PlacementBuilder,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PROVISIONER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting compute-provisioner");

    let config = ProvisionerConfig::load()?;
    info!(
        instance = %config.instance_name,
        namespace = %config.namespace,
        interval_secs = config.cycle_interval_secs,
        "Provisioner configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = ProvisionerMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(PROVISIONER_VERSION, &config.catalog.default_region);

    // Catalog and preferences must load before the first cycle
    let resolver = Arc::new(CatalogResolver::new(&config.catalog.default_region));
    let watcher = CatalogWatcher::new(
        resolver.clone(),
        config.catalog.catalog_path.clone(),
        config.catalog.preferences_path.clone(),
    )
    .with_instance_name(&config.instance_name);
    watcher
        .load_initial()
        .await
        .context("Failed to load instance catalog")?;
    if config.catalog.catalog_path.is_none() {
        warn!("No catalog file configured; every instance request will miss");
        health_registry
            .set_degraded(components::CATALOG, "No catalog configured")
            .await;
    } else {
        health_registry.set_healthy(components::CATALOG).await;
    }
    let _watch_handle = if config.catalog.watch {
        Some(watcher.start().await?)
    } else {
        None
    };

    let cluster: Arc<dyn ClusterClient> = if config.kube.disabled {
        warn!("Cluster access disabled; running detached");
        Arc::new(DetachedCluster)
    } else {
        Arc::new(
            KubeClusterClient::try_default(&config.namespace)
                .await
                .context("Failed to create Kubernetes client")?,
        )
    };

    let coordinator = Arc::new(
        AutoscaleCoordinator::builder()
            .config(config.autoscale.clone())
            .resolver(resolver)
            .placement(PlacementBuilder::new(config.placement.clone()))
            .cluster(cluster)
            .provisioner(Arc::new(CommandNodeProvisioner::new(
                config.node_commands.clone(),
            )))
            .runs(Arc::new(InMemoryRunStore::new()))
            .attempts(Arc::new(InMemoryAttemptStore::new()))
            .health(health_registry.clone())
            .instance_name(&config.instance_name)
            .build()?,
    );

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        coordinator.clone(),
    ));

    health_registry.set_ready(true).await;

    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let interval = Duration::from_secs(config.cycle_interval_secs.max(1));
    let loop_handle = tokio::spawn(coordinator.run(interval, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());
    if let Err(e) = loop_handle.await {
        error!(error = %e, "Autoscale loop panicked");
    }
    info!("Shutting down");

    Ok(())
}
