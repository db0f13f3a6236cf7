//! # VaultServer Strategy
//!
//! Deploys a Vault server into the cluster:
//!
//! 1. TLS material, user-provided or self-signed (`FailedToCreateVaultTLSSecret`)
//! 2. rendered HCL configuration (`FailedToCreateVaultConfig`)
//! 3. ServiceAccount, Service and Deployment (`FailedToDeployVault`)
//! 4. connection binding for clients (`FailedToCreateAppBinding`)
//!
//! Child objects carry owner references, so deletion needs no cleanup.
//! After a successful reconcile a monitor polls the server's health endpoint
//! and keeps `status.vaultStatus` current.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use kube::ResourceExt;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::{HealthProbe, ServerTopology};
use crate::controller::status::StatusReporter;
use crate::controller::strategy::{report_failure, report_success, ReconcileStrategy};
use crate::controller::ReconcileError;
use crate::crd::{VaultServer, VaultServerStatus};

pub const REASON_TLS_FAILED: &str = "FailedToCreateVaultTLSSecret";
pub const REASON_CONFIG_FAILED: &str = "FailedToCreateVaultConfig";
pub const REASON_DEPLOY_FAILED: &str = "FailedToDeployVault";
pub const REASON_BINDING_FAILED: &str = "FailedToCreateAppBinding";

pub struct ServerStrategy {
    topology: Arc<dyn ServerTopology>,
    probe: Arc<dyn HealthProbe>,
    reporter: StatusReporter<VaultServer>,
    monitor_interval: Duration,
}

impl std::fmt::Debug for ServerStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerStrategy")
            .field("monitor_interval", &self.monitor_interval)
            .finish_non_exhaustive()
    }
}

impl ServerStrategy {
    pub fn new(
        topology: Arc<dyn ServerTopology>,
        probe: Arc<dyn HealthProbe>,
        reporter: StatusReporter<VaultServer>,
        monitor_interval: Duration,
    ) -> Self {
        Self {
            topology,
            probe,
            reporter,
            // tokio intervals panic on a zero period
            monitor_interval: monitor_interval.max(Duration::from_millis(1)),
        }
    }
}

#[async_trait]
impl ReconcileStrategy<VaultServer> for ServerStrategy {
    async fn reconcile(&self, server: &VaultServer) -> Result<(), ReconcileError> {
        let tls = match self.topology.ensure_tls(server).await {
            Ok(tls) => tls,
            Err(e) => return Err(report_failure(&self.reporter, server, REASON_TLS_FAILED, e).await),
        };

        if let Err(e) = self.topology.ensure_config(server).await {
            return Err(report_failure(&self.reporter, server, REASON_CONFIG_FAILED, e).await);
        }

        if let Err(e) = self.topology.ensure_deployed(server).await {
            return Err(report_failure(&self.reporter, server, REASON_DEPLOY_FAILED, e).await);
        }

        if let Err(e) = self.topology.ensure_binding(server, &tls).await {
            return Err(report_failure(&self.reporter, server, REASON_BINDING_FAILED, e).await);
        }

        report_success(&self.reporter, server, "vault server is deployed").await?;
        info!("✅ VaultServer {} deployed", server.name_any());
        Ok(())
    }

    async fn finalize(&self, server: &VaultServer) -> Result<(), ReconcileError> {
        debug!(
            "VaultServer {} children are garbage collected through owner references",
            server.name_any()
        );
        Ok(())
    }

    fn monitor(&self, server: &VaultServer) -> Option<BoxFuture<'static, ()>> {
        let probe = Arc::clone(&self.probe);
        let reporter = self.reporter.clone();
        let interval = self.monitor_interval;
        let namespace = server.namespace().unwrap_or_default();
        let name = server.name_any();

        Some(
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    ticker.tick().await;

                    let live = match reporter.store().get(&namespace, &name).await {
                        Ok(live) if live.metadata.deletion_timestamp.is_none() => live,
                        Ok(_) => {
                            debug!("VaultServer {namespace}/{name} is being deleted, stopping monitor");
                            return;
                        }
                        Err(e) if e.is_not_found() => {
                            debug!("VaultServer {namespace}/{name} is gone, stopping monitor");
                            return;
                        }
                        Err(e) => {
                            warn!("Failed to read VaultServer {namespace}/{name}: {e}");
                            continue;
                        }
                    };

                    let vault_status = match probe.probe(&live).await {
                        Ok(vault_status) => vault_status,
                        Err(e) => {
                            warn!("Health check of VaultServer {namespace}/{name} failed: {e}");
                            continue;
                        }
                    };

                    let result = reporter
                        .patch_status(&live, |status: &mut VaultServerStatus| {
                            status.vault_status = Some(vault_status.clone());
                        })
                        .await;
                    if let Err(e) = result {
                        warn!("Failed to update vaultStatus of {namespace}/{name}: {e}");
                    }
                }
            }
            .boxed(),
        )
    }
}
