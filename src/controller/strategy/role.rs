//! # Role Strategy
//!
//! Provisions a dynamic-credential role in a Vault secrets engine:
//!
//! 1. mount the engine (`FailedToEnableEngine`)
//! 2. write the engine connection config (`FailedToCreateConfig`)
//! 3. create or overwrite the role (`FailedToCreateRole`)
//!
//! The backend is built on every run from the resource, since the token and
//! engine credentials it references may have changed.

use std::sync::Arc;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::backend::{role_name, RoleBackendFactory, RoleSpec};
use crate::controller::status::StatusReporter;
use crate::controller::strategy::{report_failure, report_success, ReconcileStrategy};
use crate::controller::ReconcileError;

pub const REASON_ENABLE_ENGINE_FAILED: &str = "FailedToEnableEngine";
pub const REASON_CREATE_CONFIG_FAILED: &str = "FailedToCreateConfig";
pub const REASON_CREATE_ROLE_FAILED: &str = "FailedToCreateRole";
pub const REASON_DELETE_ROLE_FAILED: &str = "FailedToDeleteRole";

pub struct RoleStrategy<K: RoleSpec> {
    factory: Arc<dyn RoleBackendFactory<K>>,
    reporter: StatusReporter<K>,
    cluster_name: Option<String>,
}

impl<K: RoleSpec> std::fmt::Debug for RoleStrategy<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleStrategy")
            .field("kind", &K::kind(&()))
            .field("cluster_name", &self.cluster_name)
            .finish_non_exhaustive()
    }
}

impl<K: RoleSpec> RoleStrategy<K> {
    pub fn new(
        factory: Arc<dyn RoleBackendFactory<K>>,
        reporter: StatusReporter<K>,
        cluster_name: Option<String>,
    ) -> Self {
        Self {
            factory,
            reporter,
            cluster_name,
        }
    }
}

#[async_trait]
impl<K: RoleSpec> ReconcileStrategy<K> for RoleStrategy<K> {
    async fn reconcile(&self, obj: &K) -> Result<(), ReconcileError> {
        let backend = match self.factory.backend_for(obj).await {
            Ok(backend) => backend,
            Err(e) => {
                return Err(report_failure(&self.reporter, obj, REASON_ENABLE_ENGINE_FAILED, e).await)
            }
        };

        if let Err(e) = backend.enable_engine().await {
            return Err(report_failure(&self.reporter, obj, REASON_ENABLE_ENGINE_FAILED, e).await);
        }
        debug!(path = %obj.engine_path(), "Secrets engine enabled");

        if let Err(e) = backend.write_config().await {
            return Err(report_failure(&self.reporter, obj, REASON_CREATE_CONFIG_FAILED, e).await);
        }
        debug!(path = %obj.engine_path(), "Engine config written");

        if let Err(e) = backend.create_or_update_role().await {
            return Err(report_failure(&self.reporter, obj, REASON_CREATE_ROLE_FAILED, e).await);
        }

        report_success(&self.reporter, obj, &format!("{} is ready to use", K::kind(&()))).await?;
        info!("✅ {} {} provisioned", K::kind(&()), obj.name_any());
        Ok(())
    }

    async fn finalize(&self, obj: &K) -> Result<(), ReconcileError> {
        let name = role_name(
            self.cluster_name.as_deref(),
            &obj.namespace().unwrap_or_default(),
            &obj.name_any(),
        );
        let backend = self
            .factory
            .backend_for(obj)
            .await
            .map_err(|e| ReconcileError::step(REASON_DELETE_ROLE_FAILED, e))?;
        backend
            .delete_role(&name)
            .await
            .map_err(|e| ReconcileError::step(REASON_DELETE_ROLE_FAILED, e))?;
        info!(role = %name, "Deleted role");
        Ok(())
    }
}
