//! # Initialization
//!
//! Process setup shared by every kind: rustls, configuration, tracing,
//! metrics, the probe server and the Kubernetes client.

use std::sync::Arc;

use anyhow::{Context, Result};
use kube::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ControllerConfig, SharedControllerConfig};
use crate::observability;
use crate::server::{start_server, ServerState};

/// Everything the watch loops need once the process is set up
pub struct InitializationResult {
    pub client: Client,
    pub config: SharedControllerConfig,
    pub server_state: Arc<ServerState>,
    /// Cancelling stops the probe server
    pub server_shutdown: CancellationToken,
    pub server_handle: JoinHandle<()>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .field(
                "server_ready",
                &self
                    .server_state
                    .is_ready
                    .load(std::sync::atomic::Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before any TLS connection is made
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    let config: SharedControllerConfig = Arc::new(ControllerConfig::from_env());
    observability::logging::init_tracing(config.log_format)?;
    if !provider_installed {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting Vault Engine Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(
        "Configuration: workers={}, max_num_requeues={}, finalizer_interval={}s, finalizer_timeout={}s, namespace={}",
        config.num_workers,
        config.max_num_requeues,
        config.finalizer_interval_secs,
        config.finalizer_timeout_secs,
        config.watch_namespace.as_deref().unwrap_or("<all>")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_shutdown = CancellationToken::new();
    let server_handle = {
        let state = Arc::clone(&server_state);
        let shutdown = server_shutdown.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state, shutdown).await {
                error!("HTTP server error: {}", e);
            }
        })
    };

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    Ok(InitializationResult {
        client,
        config,
        server_state,
        server_shutdown,
        server_handle,
    })
}
