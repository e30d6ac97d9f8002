//! OSO S3 Bucket Kubernetes Operator
//!
//! Main entry point for the operator. Loads configuration and backend
//! definitions, sets up the Kubernetes client, and runs the Bucket
//! controller alongside the metrics server.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use s3_bucket_operator::{
    adapters::{build_backend_store, load_backends_config, BackendRegistry, BackendStore, KubeRecordStore},
    config::OperatorConfig,
    controllers::{self, Context},
    metrics,
    reconcilers::{BucketCache, BucketReconciler},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting OSO S3 Bucket Operator");

    let config = Arc::new(OperatorConfig::from_env()?);
    info!(
        min_replicas = config.min_replicas,
        auto_pause = config.auto_pause,
        recreate_missing_bucket = config.recreate_missing_bucket,
        "Loaded operator configuration"
    );

    let backends = Arc::new(match &config.backends_config {
        Some(path) => build_backend_store(&load_backends_config(path)?)?,
        None => {
            warn!("BACKENDS_CONFIG is not set, no storage backends registered");
            BackendStore::new()
        }
    });
    let active = backends.all_backend_names(false).len();
    let total = backends.all_backend_names(true).len();
    metrics::record_backends(active, total - active);
    info!(active, total, "Registered storage backends");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let cache = Arc::new(BucketCache::new(config.bucket_cache_ttl));
    let engine = Arc::new(BucketReconciler::new(
        backends.clone(),
        backends,
        Arc::new(KubeRecordStore::new(client.clone())),
        cache.clone(),
        config.clone(),
    ));

    // Create shared context
    let context = Arc::new(Context::new(engine, config.clone()));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    let shutdown = CancellationToken::new();
    let purge_handle = tokio::spawn(purge_cache(cache, config.bucket_cache_ttl, shutdown.clone()));

    let bucket_controller = controllers::run_bucket_controller(client, context);

    // Handle graceful shutdown
    tokio::select! {
        _ = bucket_controller => {
            error!("Bucket controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    shutdown.cancel();
    let _ = purge_handle.await;

    info!("OSO S3 Bucket Operator stopped");
    Ok(())
}

/// Periodically drop expired converged-bucket entries
async fn purge_cache(cache: Arc<BucketCache>, every: std::time::Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(purged, "Purged expired bucket cache entries");
                }
            }
        }
    }
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
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
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
