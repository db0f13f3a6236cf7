//! # Reconcile Strategies
//!
//! Per-kind reconcile logic driven by the dispatcher and the finalizer manager.
//!
//! - `role.rs` - AWSRole, AzureRole, GCPRole and DatabaseRole
//! - `server.rs` - VaultServer, including its health monitor
//!
//! Steps run in order and stop at the first failure. The failing step is
//! reported as a `Failure` condition whose reason names the step; full success
//! replaces it with `Available`.

mod role;
mod server;

use async_trait::async_trait;
use futures::future::BoxFuture;
use kube::Resource;
use tracing::warn;

use crate::backend::BackendError;
use crate::constants::{CONDITION_AVAILABLE, CONDITION_FAILURE, CONDITION_TRUE, PHASE_SUCCESS};
use crate::controller::status::{remove_condition, set_condition, StatusReporter};
use crate::controller::ReconcileError;
use crate::crd::{Condition, ManagedResource, StatusObject};

pub use role::RoleStrategy;
pub use server::ServerStrategy;

/// Reason of the `Available` condition after a full reconcile
pub const REASON_PROVISIONED: &str = "Provisioned";

#[async_trait]
pub trait ReconcileStrategy<K: ManagedResource>: Send + Sync {
    /// Bring external state in line with `obj`
    async fn reconcile(&self, obj: &K) -> Result<(), ReconcileError>;

    /// Remove external state created for `obj`; state that is already gone is success
    async fn finalize(&self, obj: &K) -> Result<(), ReconcileError>;

    /// Long-lived background task started after a successful reconcile
    fn monitor(&self, _obj: &K) -> Option<BoxFuture<'static, ()>> {
        None
    }
}

/// Record a failed step as the `Failure` condition and return its error
///
/// A failing status write is logged; the step error is what gets retried.
pub(crate) async fn report_failure<K: ManagedResource>(
    reporter: &StatusReporter<K>,
    obj: &K,
    reason: &str,
    source: BackendError,
) -> ReconcileError {
    let message = source.to_string();
    let result = reporter
        .patch_status(obj, |status| {
            let common = status.common_mut();
            remove_condition(&mut common.conditions, CONDITION_AVAILABLE);
            set_condition(
                &mut common.conditions,
                Condition::new(CONDITION_FAILURE, CONDITION_TRUE, reason, message.as_str()),
            );
        })
        .await;

    if let Err(e) = result {
        warn!(reason, error = %e, "Failed to record failure condition");
    }
    ReconcileError::step(reason, source)
}

/// Mark `obj` fully reconciled at its current generation
pub(crate) async fn report_success<K: ManagedResource>(
    reporter: &StatusReporter<K>,
    obj: &K,
    message: &str,
) -> Result<(), ReconcileError> {
    let generation = obj.meta().generation;
    reporter
        .patch_status(obj, |status| {
            let common = status.common_mut();
            remove_condition(&mut common.conditions, CONDITION_FAILURE);
            set_condition(
                &mut common.conditions,
                Condition::new(CONDITION_AVAILABLE, CONDITION_TRUE, REASON_PROVISIONED, message),
            );
            common.phase = Some(PHASE_SUCCESS.to_string());
            common.observed_generation = generation;
        })
        .await?;
    Ok(())
}
