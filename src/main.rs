//! # Reconcile Controller
//!
//! Runs the level-triggered controller against `Network` resources.
//!
//! ## Overview
//!
//! 1. **Watch** - lists then watches `Network` objects into a local cache
//! 2. **Enqueue** - every add, update and delete queues the object's key
//! 3. **Reconcile** - workers pull keys and reconcile the cached state
//! 4. **Retry** - failures come back with per-key exponential backoff
//!
//! Metrics and probes are served on `METRICS_PORT`. SIGINT or SIGTERM drain
//! the queue and stop the workers before the process exits.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kube::{Api, Client};
use kube_runtime::watcher;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use reconcile_controller::config::ControllerConfig;
use reconcile_controller::controller::KubeWatchSource;
use reconcile_controller::crd::Network;
use reconcile_controller::observability::metrics;
use reconcile_controller::reconciler::NetworkReconciler;
use reconcile_controller::runtime::{Controller, ControllerError};
use reconcile_controller::server::{start_server, ServerState};

/// Level-triggered controller for Network resources
#[derive(Parser, Debug)]
#[command(name = "reconcile-controller", version, about, long_about = None)]
struct Args {
    /// Number of concurrent reconcile workers (overrides WORKER_COUNT)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Namespace to watch (overrides WATCH_NAMESPACE, defaults to all namespaces)
    #[arg(short, long)]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Required for rustls 0.23+ before any TLS connection is made
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    let args = Args::parse();
    let mut config = ControllerConfig::from_env();
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if args.namespace.is_some() {
        config.watch_namespace = args.namespace;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    info!("Starting Reconcile Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(
        workers = config.worker_count,
        namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        backoff = %config.backoff_strategy,
        "Loaded configuration"
    );

    metrics::register_metrics()?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let networks: Api<Network> = match &config.watch_namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };

    let source = KubeWatchSource::new(networks, watcher::Config::default());
    let controller = Controller::new(config.clone(), source, Arc::new(NetworkReconciler))?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_for_signals(shutdown.clone()));

    let server_state = Arc::new(ServerState {
        lifecycle: controller.subscribe(),
    });
    let server_shutdown = shutdown.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(metrics_port, server_state, server_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    let mut controller_task = tokio::spawn(controller.run(shutdown.clone()));
    let joined = tokio::select! {
        joined = &mut controller_task => joined,
        () = shutdown.cancelled() => {
            let grace = config.shutdown_grace_period();
            match tokio::time::timeout(grace, &mut controller_task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        grace_period_secs = grace.as_secs(),
                        "Controller did not stop within the grace period, exiting"
                    );
                    controller_task.abort();
                    return Ok(());
                }
            }
        }
    };

    match joined.context("Controller task failed")? {
        Ok(()) => info!("Controller stopped"),
        Err(ControllerError::CacheSyncCancelled) => {
            info!("Shutdown requested before the cache synced");
        }
        Err(e) => {
            shutdown.cancel();
            return Err(e).context("Controller failed");
        }
    }

    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
async fn watch_for_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
    shutdown.cancel();
}
