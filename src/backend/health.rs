//! # VaultServer Health Probe

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;

use crate::backend::topology::{server_address, tls_secret_name};
use crate::backend::{BackendError, HealthProbe, VaultClient};
use crate::crd::{VaultServer, VaultStatus};
use crate::store::SecretSource;

/// Probes `GET /v1/sys/health` of a deployed server, trusting the CA from its TLS Secret
pub struct VaultHealthProbe {
    secrets: Arc<dyn SecretSource>,
    request_timeout: Duration,
}

impl std::fmt::Debug for VaultHealthProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultHealthProbe")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl VaultHealthProbe {
    pub fn new(secrets: Arc<dyn SecretSource>, request_timeout: Duration) -> Self {
        Self {
            secrets,
            request_timeout,
        }
    }
}

#[async_trait]
impl HealthProbe for VaultHealthProbe {
    async fn probe(&self, server: &VaultServer) -> Result<VaultStatus, BackendError> {
        let namespace = server.namespace().unwrap_or_default();
        let ca = self
            .secrets
            .get_secret(&namespace, &tls_secret_name(server))
            .await?
            .and_then(|data| data.get("ca.crt").cloned());

        let client = VaultClient::new(
            &server_address(server),
            None,
            ca.as_deref(),
            false,
            self.request_timeout,
        )?;
        let health = client.health().await?;

        Ok(VaultStatus {
            initialized: health.initialized,
            sealed: health.sealed,
            standby: health.standby,
            version: health.version,
            last_checked: Some(chrono::Utc::now().to_rfc3339()),
        })
    }
}
