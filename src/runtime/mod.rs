//! # Runtime
//!
//! Entry point of the controller process.
//!
//! 1. `initialization` - rustls, configuration, tracing, metrics, probe server, client
//! 2. `watch_loop` - one reflector watch and one dispatcher per kind
//! 3. readiness once every cache has synced, then the dispatchers run until
//!    SIGINT/SIGTERM shuts the queues down

pub mod initialization;
pub mod watch_loop;

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{KubeServerTopology, VaultBackendFactory, VaultHealthProbe};
use crate::controller::{
    FinalizerRegistry, MonitorRegistry, ReconcileStrategy, RoleStrategy, ServerStrategy,
    WorkQueue,
};
use crate::crd::{AwsRole, AzureRole, DatabaseRole, GcpRole, VaultServer};
use crate::server::ServerState;
use crate::store::{KubeSecretSource, SecretSource};

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::{watch_kind, KindRuntime, SharedRuntime};

/// Run the controller until a shutdown signal is received
pub async fn run() -> Result<()> {
    let init = initialize().await?;
    let config = Arc::clone(&init.config);

    let shared = SharedRuntime {
        client: init.client.clone(),
        config: Arc::clone(&config),
        finalizers: FinalizerRegistry::new(),
        monitors: MonitorRegistry::new(),
    };

    let secrets: Arc<dyn SecretSource> = Arc::new(KubeSecretSource::new(init.client.clone()));
    let factory = Arc::new(VaultBackendFactory::new(
        Arc::clone(&secrets),
        config.cluster_name.clone(),
        config.vault_request_timeout(),
    ));
    let cluster_name = config.cluster_name.clone();

    let kinds = vec![
        shared.start_kind::<AwsRole, _>(|reporter| {
            let factory: Arc<VaultBackendFactory> = Arc::clone(&factory);
            Arc::new(RoleStrategy::new(factory, reporter, cluster_name.clone()))
                as Arc<dyn ReconcileStrategy<AwsRole>>
        }),
        shared.start_kind::<AzureRole, _>(|reporter| {
            let factory: Arc<VaultBackendFactory> = Arc::clone(&factory);
            Arc::new(RoleStrategy::new(factory, reporter, cluster_name.clone()))
                as Arc<dyn ReconcileStrategy<AzureRole>>
        }),
        shared.start_kind::<GcpRole, _>(|reporter| {
            let factory: Arc<VaultBackendFactory> = Arc::clone(&factory);
            Arc::new(RoleStrategy::new(factory, reporter, cluster_name.clone()))
                as Arc<dyn ReconcileStrategy<GcpRole>>
        }),
        shared.start_kind::<DatabaseRole, _>(|reporter| {
            let factory: Arc<VaultBackendFactory> = Arc::clone(&factory);
            Arc::new(RoleStrategy::new(factory, reporter, cluster_name.clone()))
                as Arc<dyn ReconcileStrategy<DatabaseRole>>
        }),
        shared.start_kind::<VaultServer, _>(|reporter| {
            Arc::new(ServerStrategy::new(
                Arc::new(KubeServerTopology::new(init.client.clone())),
                Arc::new(VaultHealthProbe::new(
                    Arc::clone(&secrets),
                    config.vault_request_timeout(),
                )),
                reporter,
                config.monitor_interval(),
            )) as Arc<dyn ReconcileStrategy<VaultServer>>
        }),
    ];

    let mut queues = Vec::with_capacity(kinds.len());
    let mut workers = Vec::with_capacity(kinds.len());
    for kind in kinds {
        kind.ready.await;
        queues.push(kind.queue);
        workers.push(kind.run);
    }
    init.server_state.mark_ready();
    info!("All caches synced, starting dispatchers");

    let stop = CancellationToken::new();
    spawn_shutdown_handler(
        queues,
        shared.monitors.clone(),
        Arc::clone(&init.server_state),
        stop.clone(),
    );

    futures::future::join_all(workers).await;
    stop.cancel();
    info!("Dispatchers stopped, shutting down HTTP server");

    init.server_shutdown.cancel();
    if let Err(e) = init.server_handle.await {
        warn!("HTTP server task failed: {e}");
    }
    Ok(())
}

/// On SIGINT/SIGTERM: report not ready, stop monitors and shut the queues down
///
/// Queued keys are still drained; in-flight reconciles finish.
fn spawn_shutdown_handler(
    queues: Vec<WorkQueue>,
    monitors: MonitorRegistry,
    server_state: Arc<ServerState>,
    stop: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            result = shutdown_signal() => {
                if let Err(e) = result {
                    warn!("Failed to listen for shutdown signal: {e}");
                }
            }
            () = stop.cancelled() => return,
        }
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        server_state.mark_not_ready();
        monitors.cancel_all();
        for queue in &queues {
            queue.shut_down();
        }
    });
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
